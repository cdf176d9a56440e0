use crate::config::{validate_setting, SETTING_KEYS};
use crate::db::Database;
use crate::error::ChatError;
use std::collections::BTreeMap;

/// Stored settings, with API keys masked for display.
pub fn get_settings(db: &Database) -> Result<BTreeMap<String, String>, ChatError> {
    let mut map = BTreeMap::new();
    for key in SETTING_KEYS {
        if let Some(value) = db.get_setting(key)? {
            if key.ends_with("_api_key") {
                map.insert(key.to_string(), mask_secret(&value));
            } else {
                map.insert(key.to_string(), value);
            }
        }
    }
    Ok(map)
}

pub fn set_setting(db: &Database, key: &str, value: &str) -> Result<(), ChatError> {
    validate_setting(key, value)?;
    db.set_setting(key, value.trim())?;
    Ok(())
}

pub fn delete_setting(db: &Database, key: &str) -> Result<bool, ChatError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(ChatError::Config(format!("Unknown setting key: {}", key)));
    }
    Ok(db.delete_setting(key)?)
}

fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
