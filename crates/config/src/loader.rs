use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::AppConfig;

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

/// Loads the config from `PYTHIAN_CONFIG` or the given default path, then
/// applies `PYTHIAN_*` environment overrides. A missing file at the default
/// path yields the built-in defaults so a bare binary still starts.
pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var("PYTHIAN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = if configured.exists() {
        load_from_path(&configured)?
    } else {
        AppConfig::default()
    };

    if let Ok(log_level) = env::var("PYTHIAN_LOG_LEVEL") {
        let trimmed = log_level.trim();
        if !trimmed.is_empty() {
            config.system.log_level = trimmed.to_string();
        }
    }
    if let Some(log_json) = env::var("PYTHIAN_LOG_JSON").ok().and_then(parse_env_bool) {
        config.system.log_json = log_json;
    }
    if let Ok(http_url) = env::var("PYTHIAN_RPC_HTTP_URL") {
        config.rpc.http_url = http_url;
    }
    if let Ok(ws_url) = env::var("PYTHIAN_RPC_WS_URL") {
        config.rpc.ws_url = ws_url;
    }
    if let Ok(network) = env::var("PYTHIAN_ORACLE_NETWORK") {
        let trimmed = network.trim();
        if !trimmed.is_empty() {
            config.oracle.network = trimmed.to_string();
        }
    }
    if let Ok(program_id) = env::var("PYTHIAN_ORACLE_PROGRAM_ID") {
        config.oracle.program_id = program_id;
    }
    if let Ok(source) = env::var("PYTHIAN_ORACLE_SOURCE") {
        let trimmed = source.trim();
        if !trimmed.is_empty() {
            config.oracle.source = trimmed.to_string();
        }
    }
    if let Ok(listen_address) = env::var("PYTHIAN_LISTEN_ADDRESS") {
        let trimmed = listen_address.trim();
        if !trimmed.is_empty() {
            config.publisher.listen_address = trimmed.to_string();
        }
    }
    if let Ok(key_path) = env::var("PYTHIAN_KEY_PATH") {
        config.publisher.key_path = key_path;
    }
    if let Some(blockhash_interval_ms) = env::var("PYTHIAN_BLOCKHASH_INTERVAL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        config.schedule.blockhash_interval_ms = blockhash_interval_ms;
    }
    if let Some(stale_horizon_slots) = env::var("PYTHIAN_STALE_HORIZON_SLOTS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        config.schedule.stale_horizon_slots = stale_horizon_slots;
    }
    if let Some(submit_timeout_ms) = env::var("PYTHIAN_SUBMIT_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        config.schedule.submit_timeout_ms = submit_timeout_ms;
    }

    Ok((config, configured))
}

fn parse_env_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
