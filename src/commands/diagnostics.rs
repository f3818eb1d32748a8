use serde_json::{json, Value};

use crate::db::DbState;
use crate::diagnostics;

pub fn diagnostics_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

pub fn diagnostics_get_cache_health(db: &DbState) -> Result<Value, String> {
    diagnostics::get_cache_health(db).map_err(|e| e.to_string())
}

pub fn diagnostics_get_log_dir() -> Result<Value, String> {
    Ok(json!({ "path": diagnostics::get_log_dir().to_string_lossy() }))
}
