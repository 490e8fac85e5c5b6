/// Configuration for Test Object ingestion
///
/// Configuration is stored at: `$USER_HOME/.etf/ingest.json`
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::utils::time::parse_anchor;

const GIB: u64 = 1024 * 1024 * 1024;

/// Upper bound for every period given in minutes (100 years)
pub const MAX_PERIOD_MINUTES: u64 = 100 * 365 * 24 * 60;

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Managed root holding one directory per ingested object
    pub testdata_dir: PathBuf,
    /// Staging root for in-flight uploads and downloads, cleared at startup
    pub upload_dir: PathBuf,
    /// SQLite file backing persisted objects
    pub store_path: PathBuf,
    /// Limit for the sum of all files in one upload, in bytes
    pub max_upload_size: u64,
    /// Limit for a single downloaded resource, in bytes
    pub max_object_size: u64,
    pub transient_ttl_minutes: u64,
    /// Allow service endpoints that resolve to private address ranges
    pub allow_private_net_access: bool,
    /// Lifetime of persisted temporary objects; 0 disables the sweeper
    pub uploaded_lifetime_expiration_minutes: i64,
    /// Daily sweep time, "HH:MM" UTC
    pub sweep_anchor: String,
    pub sweep_startup_delay_minutes: u64,
    pub walk_max_depth: usize,
    pub http_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".etf");
        Self::with_base_dir(base)
    }
}

impl IngestConfig {
    /// Default settings with all directories placed below `base`.
    pub fn with_base_dir(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            testdata_dir: base.join("testdata"),
            upload_dir: base.join("http_uploads"),
            store_path: base.join("testobjects.db"),
            max_upload_size: 5 * GIB,
            max_object_size: 5 * GIB,
            transient_ttl_minutes: 7,
            allow_private_net_access: false,
            uploaded_lifetime_expiration_minutes: 0,
            sweep_anchor: "00:09".to_string(),
            sweep_startup_delay_minutes: 7,
            walk_max_depth: 5,
            http_timeout_secs: 60,
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), String> {
        parse_anchor(&self.sweep_anchor)?;
        if self.walk_max_depth == 0 {
            return Err("walk_max_depth must be at least 1".to_string());
        }
        if self.testdata_dir == self.upload_dir {
            return Err("testdata_dir and upload_dir must differ".to_string());
        }
        let periods = [
            ("transient_ttl_minutes", self.transient_ttl_minutes),
            ("sweep_startup_delay_minutes", self.sweep_startup_delay_minutes),
            (
                "uploaded_lifetime_expiration_minutes",
                self.uploaded_lifetime_expiration_minutes.max(0).unsigned_abs(),
            ),
        ];
        for (name, minutes) in periods {
            if minutes > MAX_PERIOD_MINUTES {
                return Err(format!(
                    "{} must not exceed {} minutes",
                    name, MAX_PERIOD_MINUTES
                ));
            }
        }
        Ok(())
    }

    pub fn sweeper_enabled(&self) -> bool {
        self.uploaded_lifetime_expiration_minutes > 0
    }
}

/// Get the path to the config file
///
/// Returns: `$USER_HOME/.etf/ingest.json`
/// Respects `ETF_INGEST_CONFIG` environment variable for testing.
fn get_config_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("ETF_INGEST_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let home_dir = dirs::home_dir().ok_or("Failed to get user home directory")?;
    Ok(home_dir.join(".etf").join("ingest.json"))
}

/// Load configuration from disk
///
/// If the config file doesn't exist, creates a new one with default values.
pub fn load_config() -> Result<IngestConfig, String> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: IngestConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;

        Ok(config)
    } else {
        let config = IngestConfig::default();
        save_config(&config)?;
        Ok(config)
    }
}

/// Save configuration to disk
pub fn save_config(config: &IngestConfig) -> Result<(), String> {
    let config_path = get_config_path()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(&config_path, content).map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes tests that touch ETF_INGEST_CONFIG
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn with_temp_config<F>(f: F)
    where
        F: FnOnce(&TempDir),
    {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("ingest.json");

        unsafe {
            std::env::set_var("ETF_INGEST_CONFIG", config_path.to_str().unwrap());
        }

        f(&temp_dir);

        unsafe {
            std::env::remove_var("ETF_INGEST_CONFIG");
        }
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::with_base_dir("/srv/etf");
        assert_eq!(config.testdata_dir, PathBuf::from("/srv/etf/testdata"));
        assert_eq!(config.upload_dir, PathBuf::from("/srv/etf/http_uploads"));
        assert_eq!(config.transient_ttl_minutes, 7);
        assert_eq!(config.walk_max_depth, 5);
        assert_eq!(config.max_upload_size, 5 * GIB);
        assert!(!config.allow_private_net_access);
        assert!(!config.sweeper_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        with_temp_config(|temp_dir| {
            let config = load_config().expect("Failed to load config");
            assert_eq!(config.sweep_anchor, "00:09");
            assert!(temp_dir.path().join("ingest.json").exists());
        });
    }

    #[test]
    fn test_save_and_load_config() {
        with_temp_config(|temp_dir| {
            let mut config = IngestConfig::with_base_dir(temp_dir.path());
            config.allow_private_net_access = true;
            config.uploaded_lifetime_expiration_minutes = 60;
            save_config(&config).unwrap();

            let loaded = load_config().unwrap();
            assert!(loaded.allow_private_net_access);
            assert!(loaded.sweeper_enabled());
            assert_eq!(loaded.testdata_dir, temp_dir.path().join("testdata"));
        });
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        with_temp_config(|temp_dir| {
            fs::write(
                temp_dir.path().join("ingest.json"),
                r#"{ "transient_ttl_minutes": 3 }"#,
            )
            .unwrap();

            let loaded = load_config().unwrap();
            assert_eq!(loaded.transient_ttl_minutes, 3);
            assert_eq!(loaded.walk_max_depth, 5);
        });
    }

    #[test]
    fn test_oversized_periods_rejected() {
        let base = IngestConfig::with_base_dir("/srv/etf");

        let mut config = base.clone();
        config.transient_ttl_minutes = u64::MAX;
        assert!(config.validate().unwrap_err().contains("transient_ttl_minutes"));

        let mut config = base.clone();
        config.sweep_startup_delay_minutes = MAX_PERIOD_MINUTES + 1;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.uploaded_lifetime_expiration_minutes = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = base;
        config.uploaded_lifetime_expiration_minutes = i64::MIN;
        config.transient_ttl_minutes = MAX_PERIOD_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_anchor_rejected() {
        let mut config = IngestConfig::with_base_dir("/srv/etf");
        config.sweep_anchor = "9 o'clock".to_string();
        assert!(config.validate().is_err());
    }
}
