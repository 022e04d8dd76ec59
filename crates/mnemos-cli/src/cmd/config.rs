use crate::ui;
use mnemos_store::config::{default_config_path, load_config};
use mnemos_types::config::{BackendSelection, StorageConfig};
use mnemos_types::error::{StoreError, StoreResult};
use std::path::Path;

pub fn cmd_config(config_path: Option<&Path>, json: bool) -> StoreResult<()> {
    let mut config = load_config(config_path);
    config.postgres_url = config.postgres_url.as_deref().map(redact_url);

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);
    ui::section("Mnemos Configuration");
    ui::blank();
    ui::kv("File", &path.display().to_string());
    ui::kv("Backend", &describe(&config));
    ui::blank();
    let rendered = toml::to_string_pretty(&config).map_err(|e| StoreError::Config(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn describe(config: &StorageConfig) -> String {
    match config.backend() {
        BackendSelection::Postgres { url } => format!("postgres ({url})"),
        BackendSelection::Embedded { data_dir } => format!("embedded ({})", data_dir.display()),
        BackendSelection::InMemory => "embedded (in memory)".to_string(),
    }
}

/// Hide the password of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
