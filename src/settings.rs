use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    Security,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Grading, SetupSection::Security];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "security" => Some(Self::Security),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Security => "security",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Security => "setup.security",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "defaultCreditUnits": 3,
            "percentagePassingThreshold": 75,
            "autoAverageFinalScore": false
        }),
        SetupSection::Security => json!({
            "resetCodeTtlMinutes": 5,
            "minPasswordLength": 8
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "defaultCreditUnits" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                "percentagePassingThreshold" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                "autoAverageFinalScore" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "resetCodeTtlMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 60)?));
                }
                "minPasswordLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 4, 128)?));
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

/// Applies `patch` on top of the stored section. `Ok(Err(msg))` is a validation failure.
pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradingConfig {
    pub default_credit_units: i64,
    pub percentage_passing_threshold: f64,
    pub auto_average_final_score: bool,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            default_credit_units: 3,
            percentage_passing_threshold: 75.0,
            auto_average_final_score: false,
        }
    }
}

impl GradingConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let v = load_section(conn, SetupSection::Grading)?;
        let d = Self::default();
        Ok(Self {
            default_credit_units: v
                .get("defaultCreditUnits")
                .and_then(|x| x.as_i64())
                .unwrap_or(d.default_credit_units),
            percentage_passing_threshold: v
                .get("percentagePassingThreshold")
                .and_then(|x| x.as_f64())
                .unwrap_or(d.percentage_passing_threshold),
            auto_average_final_score: v
                .get("autoAverageFinalScore")
                .and_then(|x| x.as_bool())
                .unwrap_or(d.auto_average_final_score),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    pub reset_code_ttl_minutes: i64,
    pub min_password_length: usize,
}

impl SecurityConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let v = load_section(conn, SetupSection::Security)?;
        Ok(Self {
            reset_code_ttl_minutes: v
                .get("resetCodeTtlMinutes")
                .and_then(|x| x.as_i64())
                .unwrap_or(5),
            min_password_length: v
                .get("minPasswordLength")
                .and_then(|x| x.as_u64())
                .unwrap_or(8) as usize,
        })
    }
}
