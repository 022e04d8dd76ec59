//! Loading `StorageConfig` from TOML plus environment overrides.

use mnemos_types::config::StorageConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Overrides `postgres_url`; checked before [`POSTGRES_URL_FALLBACK_ENV`].
pub const POSTGRES_URL_ENV: &str = "MNEMOS_POSTGRES_URL";
pub const POSTGRES_URL_FALLBACK_ENV: &str = "POSTGRES_URL";
/// Overrides `data_dir`.
pub const DATA_DIR_ENV: &str = "MNEMOS_DATA_DIR";

/// `~/.mnemos`, or a temp directory without a home.
pub fn mnemos_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mnemos")
}

pub fn default_config_path() -> PathBuf {
    mnemos_home().join("config.toml")
}

/// Load storage configuration from a TOML file (default
/// `~/.mnemos/config.toml`), then apply environment overrides. A missing or
/// malformed file yields the defaults.
pub fn load_config(path: Option<&Path>) -> StorageConfig {
    let mut config = read_config_file(path);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

fn read_config_file(path: Option<&Path>) -> StorageConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return StorageConfig::default();
    }
    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<StorageConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                StorageConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            StorageConfig::default()
        }
    }
}

/// Apply environment overrides read through `var`. Blank values are ignored.
pub fn apply_env_overrides(config: &mut StorageConfig, var: impl Fn(&str) -> Option<String>) {
    let lookup = |key: &str| var(key).filter(|v| !v.trim().is_empty());
    if let Some(url) = lookup(POSTGRES_URL_ENV).or_else(|| lookup(POSTGRES_URL_FALLBACK_ENV)) {
        config.postgres_url = Some(url);
    }
    if let Some(dir) = lookup(DATA_DIR_ENV) {
        config.data_dir = Some(PathBuf::from(dir));
    }
}
