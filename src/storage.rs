//! Credential storage in the OS credential store.
//!
//! Windows Credential Manager, macOS Keychain or the Linux Secret Service,
//! through the `keyring` crate. Secrets leave this module wrapped in
//! [`Zeroizing`] so they are wiped when the clients holding them drop.

use keyring::Entry;
use serde_json::{json, Value};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::inventory::InventoryCredentials;

const SERVICE_NAME: &str = "fulfilment-sync";

pub const KEY_INVENTORY_ACCOUNT_ID: &str = "inventory_account_id";
pub const KEY_INVENTORY_APPLICATION_KEY: &str = "inventory_application_key";
pub const KEY_SHEETS_ACCESS_TOKEN: &str = "sheets_access_token";

const ALL_KEYS: &[&str] = &[
    KEY_INVENTORY_ACCOUNT_ID,
    KEY_INVENTORY_APPLICATION_KEY,
    KEY_SHEETS_ACCESS_TOKEN,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Read one credential. `None` when missing or when the store is unavailable.
pub fn get_credential(key: &str) -> Option<Zeroizing<String>> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(Zeroizing::new(pw)),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<()> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| Error::Credentials(e.to_string()))?;
    entry
        .set_password(value)
        .map_err(|e| Error::Credentials(e.to_string()))
}

/// Delete a credential. Missing entries are not an error.
pub fn delete_credential(key: &str) -> Result<()> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| Error::Credentials(e.to_string()))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(Error::Credentials(e.to_string())),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some_and(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

fn require(key: &str) -> Result<Zeroizing<String>> {
    get_credential(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Credentials(format!("{key} is not configured")))
}

pub fn load_inventory_credentials() -> Result<InventoryCredentials> {
    Ok(InventoryCredentials {
        account_id: require(KEY_INVENTORY_ACCOUNT_ID)?,
        application_key: require(KEY_INVENTORY_APPLICATION_KEY)?,
    })
}

pub fn load_sheets_token() -> Result<Zeroizing<String>> {
    require(KEY_SHEETS_ACCESS_TOKEN)
}

/// Store the credentials present in `payload`.
///
/// Accepts camelCase or snake_case keys:
/// `accountId`, `applicationKey`, `sheetsAccessToken`.
pub fn update_credentials(payload: &Value) -> Result<Value> {
    let fields = [
        (KEY_INVENTORY_ACCOUNT_ID, "accountId"),
        (KEY_INVENTORY_APPLICATION_KEY, "applicationKey"),
        (KEY_SHEETS_ACCESS_TOKEN, "sheetsAccessToken"),
    ];
    let mut stored = Vec::new();
    for (key, camel) in fields {
        let value = payload
            .get(camel)
            .or_else(|| payload.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            set_credential(key, value)?;
            stored.push(key);
        }
    }
    info!(stored = ?stored, "credentials updated");
    Ok(credential_status())
}

/// Which credentials are present, never their values.
pub fn credential_status() -> Value {
    json!({
        "inventoryAccountId": has_credential(KEY_INVENTORY_ACCOUNT_ID),
        "inventoryApplicationKey": has_credential(KEY_INVENTORY_APPLICATION_KEY),
        "sheetsAccessToken": has_credential(KEY_SHEETS_ACCESS_TOKEN),
    })
}

/// Remove every stored credential.
pub fn factory_reset() -> Result<()> {
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    info!("all credentials cleared");
    Ok(())
}
