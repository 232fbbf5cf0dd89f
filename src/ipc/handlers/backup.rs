use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };
    match backup::export_workspace_bundle(&workspace, &PathBuf::from(out_path)) {
        Ok(summary) => {
            tracing::info!(out_path, sha256 = %summary.db_sha256, "workspace exported");
            ok(
                &req.id,
                json!({
                    "outPath": out_path,
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                    "dbBytes": summary.db_bytes,
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

/// The active connection is closed before the file is replaced and reopened after.
fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(in_path) = req.params.get("inPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };

    state.db = None;
    let imported = backup::import_workspace_bundle(&PathBuf::from(in_path), &workspace);
    let reopened = db::open_db(&workspace);
    let conn = match reopened {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
    };
    state.db = Some(conn);

    match imported {
        Ok(summary) => {
            tracing::info!(in_path, sha256 = %summary.db_sha256, "workspace imported");
            state.reset_codes = Default::default();
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                }),
            )
        }
        Err(e) => {
            tracing::warn!(in_path, error = %format!("{e:#}"), "workspace import rejected");
            err(&req.id, "import_failed", format!("{e:#}"), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
