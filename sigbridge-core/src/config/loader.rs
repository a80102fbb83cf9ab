//! Configuration loading and management

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Prefix for `SIGBRIDGE__SECTION__KEY` style overrides
const ENV_PATH_PREFIX: &str = "SIGBRIDGE__";

/// Configuration loader
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".sigbridge"))
            .unwrap_or_else(|| PathBuf::from(".sigbridge"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment
    pub fn load(&self) -> crate::Result<Config> {
        let config_path = self.config_path();
        let mut merged = serde_json::to_value(Config::default())?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file_value: Value = serde_json::from_str(&content)?;
            merge_values(&mut merged, file_value);
        }

        apply_alias_overrides(&mut merged);
        apply_path_overrides(&mut merged);

        let config: Config = serde_json::from_value(merged)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if let Some(existing) = base_map.get_mut(&key) {
                    merge_values(existing, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn parse_env_value(raw: &str) -> Value {
    // E.164 numbers would otherwise parse as integers
    if raw.starts_with('+') {
        return Value::String(raw.to_string());
    }
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Number(v.into());
    }
    if let Ok(v) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(v) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn set_path_value(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.clone(), value);
    }
}

/// Environment variables understood by the original deployment scripts
fn apply_alias_overrides(config: &mut Value) {
    let aliases = [
        ("SIGNAL_SERVICE", "signal.service"),
        ("SIGNAL_PHONE_NUMBER", "signal.phone_number"),
        ("PRIVATEMODE_BASE_URL", "privatemode.api_base"),
        ("PRIVATEMODE_MODEL", "privatemode.model"),
        ("PRIVATEMODE_API_KEY", "privatemode.api_key"),
    ];

    for (env_key, target_path) in aliases {
        if let Ok(value) = std::env::var(env_key) {
            if value.trim().is_empty() {
                continue;
            }
            let path: Vec<String> = target_path.split('.').map(ToString::to_string).collect();
            set_path_value(config, &path, Value::String(value));
        }
    }
}

fn apply_path_overrides(config: &mut Value) {
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix(ENV_PATH_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = suffix
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        set_path_value(config, &segments, parse_env_value(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    struct EnvVarGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::set_var(key, value) };
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.original {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::set_var(&self.key, value) };
            } else {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::remove_var(&self.key) };
            }
        }
    }

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn test_load_default_config() {
        let _lock = lock_env();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.session.max_history_messages, 10);
        assert_eq!(config.privatemode.max_tokens, 1000);
    }

    #[test]
    fn test_save_and_load_config() {
        let _lock = lock_env();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());

        let mut config = Config::default();
        config.privatemode.model = Some("test-model".to_string());
        config.session.max_history_messages = 6;

        loader.save(&config).unwrap();
        let loaded = loader.load().unwrap();

        assert_eq!(loaded.privatemode.model.as_deref(), Some("test-model"));
        assert_eq!(loaded.session.max_history_messages, 6);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let _lock = lock_env();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        std::fs::write(
            loader.config_path(),
            r#"{"replies":{"cleared":"Wiped."}}"#,
        )
        .unwrap();

        let config = loader.load().unwrap();
        assert_eq!(config.replies.cleared, "Wiped.");
        assert_eq!(
            config.replies.nothing_to_clear,
            "No conversation history to clear."
        );
    }

    #[test]
    fn test_load_applies_alias_env_overrides() {
        let _lock = lock_env();
        let _number_guard = EnvVarGuard::set("SIGNAL_PHONE_NUMBER", "+15550001111");
        let _base_guard = EnvVarGuard::set("PRIVATEMODE_BASE_URL", "http://proxy:9000");
        let _model_guard = EnvVarGuard::set("PRIVATEMODE_MODEL", "latest");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.signal.phone_number, "+15550001111");
        assert_eq!(config.privatemode.api_base, "http://proxy:9000");
        assert_eq!(config.privatemode.model.as_deref(), Some("latest"));
    }

    #[test]
    fn test_load_applies_path_env_overrides() {
        let _lock = lock_env();
        let _history_guard = EnvVarGuard::set("SIGBRIDGE__SESSION__MAX_HISTORY_MESSAGES", "4");
        let _temp_guard = EnvVarGuard::set("SIGBRIDGE__PRIVATEMODE__TEMPERATURE", "0.2");
        let _number_guard = EnvVarGuard::set("SIGBRIDGE__SIGNAL__PHONE_NUMBER", "+4912345");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.session.max_history_messages, 4);
        assert!((config.privatemode.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.signal.phone_number, "+4912345");
    }

    #[test]
    fn test_path_env_overrides_alias_and_file() {
        let _lock = lock_env();
        let _alias_guard = EnvVarGuard::set("PRIVATEMODE_MODEL", "alias-model");
        let _path_guard = EnvVarGuard::set("SIGBRIDGE__PRIVATEMODE__MODEL", "path-model");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        std::fs::write(
            loader.config_path(),
            r#"{"privatemode":{"model":"file-model"}}"#,
        )
        .unwrap();

        let config = loader.load().unwrap();
        assert_eq!(config.privatemode.model.as_deref(), Some("path-model"));
    }

    #[test]
    fn test_validation_rejects_zero_history() {
        let _lock = lock_env();
        let _guard = EnvVarGuard::set("SIGBRIDGE__SESSION__MAX_HISTORY_MESSAGES", "0");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let err = loader.load().unwrap_err();
        assert!(err.to_string().contains("max_history_messages"));
    }
}
