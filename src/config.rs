use crate::db::Database;
use crate::error::ChatError;
use crate::llm::gemini::{GeminiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::llm::GenerationConfig;
use std::path::PathBuf;
use std::str::FromStr;

pub const SETTING_KEYS: &[&str] = &[
    "gemini_api_key",
    "gemini_base_url",
    "gemini_model",
    "temperature",
    "top_k",
    "top_p",
    "max_output_tokens",
];

/// Values given on the command line or through the environment; they win
/// over stored settings.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn resolve(db: &Database, overrides: &ConfigOverrides) -> Result<Self, ChatError> {
        let api_key = match &overrides.api_key {
            Some(key) => key.clone(),
            None => db
                .get_setting("gemini_api_key")?
                .ok_or_else(|| ChatError::Config("Gemini API key not configured".into()))?,
        };
        let base_url = match &overrides.base_url {
            Some(url) => url.clone(),
            None => db
                .get_setting("gemini_base_url")?
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };
        let model = match &overrides.model {
            Some(model) => model.clone(),
            None => db
                .get_setting("gemini_model")?
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let defaults = GenerationConfig::default();
        let generation = GenerationConfig {
            temperature: parsed_setting(db, "temperature")?.unwrap_or(defaults.temperature),
            top_k: parsed_setting(db, "top_k")?.unwrap_or(defaults.top_k),
            top_p: parsed_setting(db, "top_p")?.unwrap_or(defaults.top_p),
            max_output_tokens: parsed_setting(db, "max_output_tokens")?
                .unwrap_or(defaults.max_output_tokens),
        };

        Ok(Self {
            gemini: GeminiConfig {
                api_key,
                base_url,
                model,
            },
            generation,
        })
    }
}

fn parsed_setting<T: FromStr>(db: &Database, key: &str) -> Result<Option<T>, ChatError> {
    match db.get_setting(key)? {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ChatError::Config(format!("invalid value for {}: {}", key, value))),
        None => Ok(None),
    }
}

/// Check a value before it is stored under `key`.
pub fn validate_setting(key: &str, value: &str) -> Result<(), ChatError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(ChatError::Config(format!("Unknown setting key: {}", key)));
    }
    let valid = match key {
        "temperature" | "top_p" => value.trim().parse::<f32>().is_ok(),
        "top_k" | "max_output_tokens" => value.trim().parse::<u32>().is_ok(),
        _ => !value.trim().is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(ChatError::Config(format!("invalid value for {}: {}", key, value)))
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pdf-chat")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key() {
        let db = Database::open_in_memory().unwrap();
        let err = AppConfig::resolve(&db, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_defaults_and_stored_settings() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("gemini_api_key", "stored-key").unwrap();
        db.set_setting("top_k", "20").unwrap();

        let config = AppConfig::resolve(&db, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.gemini.api_key, "stored-key");
        assert_eq!(config.gemini.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
        assert_eq!(config.generation.top_k, 20);
        assert_eq!(config.generation.max_output_tokens, 2048);
    }

    #[test]
    fn test_overrides_win() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("gemini_api_key", "stored-key").unwrap();
        db.set_setting("gemini_model", "stored-model").unwrap();
        let overrides = ConfigOverrides {
            api_key: Some("flag-key".into()),
            model: Some("flag-model".into()),
            base_url: None,
        };
        let config = AppConfig::resolve(&db, &overrides).unwrap();
        assert_eq!(config.gemini.api_key, "flag-key");
        assert_eq!(config.gemini.model, "flag-model");
    }

    #[test]
    fn test_invalid_stored_number() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("gemini_api_key", "k").unwrap();
        db.set_setting("temperature", "warm").unwrap();
        let err = AppConfig::resolve(&db, &ConfigOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_validate_setting() {
        assert!(validate_setting("top_p", "0.9").is_ok());
        assert!(validate_setting("top_k", "-1").is_err());
        assert!(validate_setting("theme", "dark").is_err());
        assert!(validate_setting("gemini_model", "  ").is_err());
    }
}
