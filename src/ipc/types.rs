use std::path::PathBuf;

use crate::auth::ResetCodeStore;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Reset codes live only as long as the process; they are never written to disk.
    pub reset_codes: ResetCodeStore,
}
