//! System keychain storage for the model-service credential.
//!
//! Credentials are stored as JSON in a single keychain entry so new
//! credential kinds can be added without extra OS prompts.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

const KEYRING_SERVICE: &str = "pairpad-credentials";
const KEYRING_USERNAME: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    crate::util::env_flag("PAIRPAD_DISABLE_KEYRING")
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keychain errors only once per process
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    warn!(
        context,
        error = err,
        "couldn't access system keychain; set PAIRPAD_API_KEY to bypass it"
    );
}

fn read_credentials() -> Result<StoredCredentials, String> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_credentials(creds: &StoredCredentials) -> Result<(), String> {
    if keyring_disabled() {
        return Err("System keychain is disabled".to_string());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    let json = serde_json::to_string(creds).map_err(|e| e.to_string())?;
    entry.set_password(&json).map_err(|e| e.to_string())
}

/// Read the stored API key, if any.
pub fn get_api_key() -> Result<Option<String>, String> {
    read_credentials().map(|creds| creds.api_key)
}

/// Store the API key, verifying the write by reading it back.
pub fn set_api_key(key: &str) -> Result<(), String> {
    let mut creds = read_credentials().unwrap_or_default();
    creds.api_key = Some(key.to_string());
    write_credentials(&creds)?;

    match get_api_key()? {
        Some(stored) if stored == key => Ok(()),
        Some(_) => Err("API key verification failed: stored key doesn't match".to_string()),
        None => Err("API key verification failed: key was not persisted".to_string()),
    }
}
