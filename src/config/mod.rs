//! Configuration management for `complaint_store`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`COMPLAINTS_*`)
//! 3. Config file (`--config`, or `./complaints.yaml`)
//! 4. Defaults

use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "database";
pub const DEFAULT_UPLOAD_DIR: &str = "storage/uploads";
pub const DEFAULT_DB_FILENAME: &str = "complaints.db";
pub const DEFAULT_LOCK_FILENAME: &str = "db.lock";
pub const DEFAULT_CONFIG_FILENAME: &str = "complaints.yaml";
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;
/// Negative values are interpreted by SQLite as KiB rather than pages.
pub const DEFAULT_CACHE_SIZE: i64 = -4000;

const ENV_PREFIX: &str = "COMPLAINTS_";

/// Resolved storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub db_file: String,
    pub lock_file: String,
    pub busy_timeout_ms: u32,
    /// SQLite `cache_size`; always negative (KiB).
    pub cache_size: i64,
    /// Seeded into `settings` only when configured.
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub jwt_secret: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            db_file: DEFAULT_DB_FILENAME.to_string(),
            lock_file: DEFAULT_LOCK_FILENAME.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            cache_size: DEFAULT_CACHE_SIZE,
            admin_username: None,
            admin_password: None,
            jwt_secret: None,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `data_dir`, with the upload directory placed beside it.
    #[must_use]
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let upload_dir = data_dir
            .parent()
            .map_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR), |p| p.join(DEFAULT_UPLOAD_DIR));
        Self {
            data_dir,
            upload_dir,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(&self.lock_file)
    }

    /// Build a config from a merged layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric key does not parse, `cache-size` is not
    /// negative, or a filename is empty.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let defaults = Self::default();

        let data_dir = get_value(layer, &["data-dir"]).map_or(defaults.data_dir, PathBuf::from);
        let upload_dir =
            get_value(layer, &["upload-dir", "upload-path"]).map_or(defaults.upload_dir, PathBuf::from);

        let db_file = get_value(layer, &["db-file"])
            .cloned()
            .unwrap_or(defaults.db_file);
        let lock_file = get_value(layer, &["lock-file"])
            .cloned()
            .unwrap_or(defaults.lock_file);
        for (key, value) in [("db-file", &db_file), ("lock-file", &lock_file)] {
            if value.trim().is_empty() {
                return Err(StoreError::Config(format!("{key} must not be empty")));
            }
        }

        let cache_size = parse_number(layer, "cache-size")?.unwrap_or(defaults.cache_size);
        if cache_size >= 0 {
            return Err(StoreError::Config(format!(
                "cache-size must be negative (KiB), got {cache_size}"
            )));
        }

        Ok(Self {
            data_dir,
            upload_dir,
            db_file,
            lock_file,
            busy_timeout_ms: parse_number(layer, "busy-timeout")?
                .unwrap_or(defaults.busy_timeout_ms),
            cache_size,
            admin_username: non_empty(layer, "admin-username"),
            admin_password: non_empty(layer, "admin-password"),
            jwt_secret: non_empty(layer, "jwt-secret"),
        })
    }

    /// Normalize directories to absolute paths when they already exist.
    #[must_use]
    pub fn canonicalized(mut self) -> Self {
        if let Ok(path) = dunce::canonicalize(&self.data_dir) {
            self.data_dir = path;
        }
        if let Ok(path) = dunce::canonicalize(&self.upload_dir) {
            self.upload_dir = path;
        }
        self
    }
}

/// A flat configuration layer keyed by normalized (kebab-case) names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key), value.into());
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from `COMPLAINTS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layer.insert(stripped, value);
            }
        }
        layer
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub busy_timeout: Option<u32>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        if let Some(path) = &self.data_dir {
            layer.insert("data-dir", path.to_string_lossy());
        }
        if let Some(path) = &self.upload_dir {
            layer.insert("upload-dir", path.to_string_lossy());
        }
        if let Some(ms) = self.busy_timeout {
            layer.insert("busy-timeout", ms.to_string());
        }

        layer
    }
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    layer.insert("data-dir", DEFAULT_DATA_DIR);
    layer.insert("upload-dir", DEFAULT_UPLOAD_DIR);
    layer.insert("busy-timeout", DEFAULT_BUSY_TIMEOUT_MS.to_string());
    layer
}

/// Load configuration with the standard precedence order.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or if a
/// value fails validation.
pub fn load_config(cli: &CliOverrides) -> Result<StoreConfig> {
    let file_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    if cli.config.is_some() && !file_path.exists() {
        return Err(StoreError::Config(format!(
            "config file not found: {}",
            file_path.display()
        )));
    }

    let merged = ConfigLayer::merge_layers(&[
        default_config_layer(),
        ConfigLayer::from_yaml(&file_path)?,
        ConfigLayer::from_env(),
        cli.as_layer(),
    ]);
    tracing::debug!(keys = merged.values.len(), file = %file_path.display(), "Loaded config layers");

    StoreConfig::from_layer(&merged)
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(['_', '.'], "-")
}

fn get_value<'a>(layer: &'a ConfigLayer, keys: &[&str]) -> Option<&'a String> {
    keys.iter().find_map(|key| layer.values.get(*key))
}

fn non_empty(layer: &ConfigLayer, key: &str) -> Option<String> {
    get_value(layer, &[key])
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(layer: &ConfigLayer, key: &str) -> Result<Option<T>> {
    get_value(layer, &[key])
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| StoreError::Config(format!("{key}: not a valid number: {value:?}")))
        })
        .transpose()
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    for (key, value) in flat {
        layer.insert(&key, value);
    }

    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_layers_empty() {
        let config = StoreConfig::from_layer(&ConfigLayer::default()).expect("config");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.db_path(), Path::new("database").join("complaints.db"));
        assert_eq!(config.lock_path(), Path::new("database").join("db.lock"));
    }

    #[test]
    fn merge_precedence_order() {
        let mut yaml = ConfigLayer::default();
        yaml.insert("busy_timeout", "1000");
        yaml.insert("data_dir", "/yaml");

        let env_layer = ConfigLayer::from_vars([
            ("COMPLAINTS_BUSY_TIMEOUT".to_string(), "2000".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);

        let cli = CliOverrides {
            busy_timeout: Some(3000),
            ..CliOverrides::default()
        };

        let merged =
            ConfigLayer::merge_layers(&[default_config_layer(), yaml, env_layer, cli.as_layer()]);
        let config = StoreConfig::from_layer(&merged).expect("config");
        assert_eq!(config.busy_timeout_ms, 3000);
        assert_eq!(config.data_dir, PathBuf::from("/yaml"));
        assert!(!merged.values.contains_key("unrelated"));
    }

    #[test]
    fn yaml_nested_keys_flatten() {
        let yaml = r"
data_dir: /srv/complaints/database
admin:
  username: root
  password: hunter2
cache_size: -8000
";
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).expect("parse yaml");
        let layer = layer_from_yaml_value(&value);
        let config = StoreConfig::from_layer(&layer).expect("config");
        assert_eq!(config.data_dir, PathBuf::from("/srv/complaints/database"));
        assert_eq!(config.admin_username.as_deref(), Some("root"));
        assert_eq!(config.admin_password.as_deref(), Some("hunter2"));
        assert_eq!(config.cache_size, -8000);
        assert!(config.jwt_secret.is_none());
    }

    #[test]
    fn invalid_number_is_config_error() {
        let mut layer = ConfigLayer::default();
        layer.insert("busy-timeout", "soon");
        let err = StoreConfig::from_layer(&layer).unwrap_err();
        assert!(matches!(err, StoreError::Config(msg) if msg.contains("busy-timeout")));
    }

    #[test]
    fn non_negative_cache_size_rejected() {
        for value in ["0", "2000"] {
            let mut layer = ConfigLayer::default();
            layer.insert("cache_size", value);
            let err = StoreConfig::from_layer(&layer).unwrap_err();
            assert!(matches!(err, StoreError::Config(msg) if msg.contains("cache-size")));
        }
    }

    #[test]
    fn empty_db_file_rejected() {
        let mut layer = ConfigLayer::default();
        layer.insert("db-file", "  ");
        assert!(StoreConfig::from_layer(&layer).is_err());
    }

    #[test]
    fn missing_explicit_config_file_is_error() {
        let temp = TempDir::new().expect("tempdir");
        let cli = CliOverrides {
            config: Some(temp.path().join("nope.yaml")),
            ..CliOverrides::default()
        };
        assert!(matches!(load_config(&cli), Err(StoreError::Config(_))));
    }

    #[test]
    fn yaml_file_layer_is_read() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("complaints.yaml");
        fs::write(&path, "upload_dir: /var/uploads\nbusy_timeout: 750\n").expect("write");

        let layer = ConfigLayer::from_yaml(&path).expect("layer");
        assert_eq!(layer.values.get("upload-dir").unwrap(), "/var/uploads");
        assert_eq!(layer.values.get("busy-timeout").unwrap(), "750");
    }

    #[test]
    fn for_data_dir_places_uploads_beside() {
        let config = StoreConfig::for_data_dir("/srv/app/database");
        assert_eq!(config.upload_dir, PathBuf::from("/srv/app/storage/uploads"));
    }
}
