use serde_json::{json, Value};
use tracing::info;

use super::value_str;
use crate::config::{AppConfig, SETTINGS_CATEGORY};
use crate::db::{self, DbState};
use crate::storage;

fn value_to_settings_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Effective settings, environment overrides included.
pub fn settings_get(db: &DbState) -> Result<Value, String> {
    let config = db
        .with_conn(|conn| Ok(AppConfig::load(conn)))
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;
    serde_json::to_value(config).map_err(|e| e.to_string())
}

/// Validate and store one setting: `{ "key": "...", "value": ... }`.
pub fn settings_set(db: &DbState, arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing settings payload")?;
    let key = value_str(&payload, &["key", "settingKey"]).ok_or("Missing required field: key")?;
    let value = value_to_settings_string(payload.get("value").unwrap_or(&Value::Null));

    AppConfig::default()
        .apply(&key, &value)
        .map_err(|e| e.to_string())?;

    db.with_conn(|conn| db::set_setting(conn, SETTINGS_CATEGORY, &key, &value))
        .map_err(|e| e.to_string())?;
    info!(key = %key, "sync setting updated");
    Ok(json!({ "success": true, "key": key, "value": value }))
}

pub fn credentials_update(arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing credentials payload")?;
    storage::update_credentials(&payload).map_err(|e| e.to_string())
}

pub fn credentials_status() -> Result<Value, String> {
    Ok(storage::credential_status())
}

pub fn credentials_clear() -> Result<Value, String> {
    storage::factory_reset().map_err(|e| e.to_string())?;
    Ok(json!({ "success": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get_setting() {
        let db = db::init_in_memory().unwrap();
        let stored = settings_set(&db, Some(json!({ "key": "queue_depth", "value": 32 }))).unwrap();
        assert_eq!(stored["value"], "32");

        let stored = db
            .with_conn(|conn| Ok(db::get_setting(conn, SETTINGS_CATEGORY, "queue_depth")))
            .unwrap();
        assert_eq!(stored.as_deref(), Some("32"));
    }

    #[test]
    fn test_invalid_setting_is_not_stored() {
        let db = db::init_in_memory().unwrap();
        let payload = json!({ "key": "page_limit", "value": "many" });
        let err = settings_set(&db, Some(payload)).unwrap_err();
        assert!(err.contains("page_limit"), "{err}");

        let stored = db
            .with_conn(|conn| Ok(db::get_setting(conn, SETTINGS_CATEGORY, "page_limit")))
            .unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_missing_key() {
        let db = db::init_in_memory().unwrap();
        assert_eq!(
            settings_set(&db, Some(json!({ "value": 1 }))).unwrap_err(),
            "Missing required field: key"
        );
        assert!(settings_set(&db, None).is_err());
    }
}
