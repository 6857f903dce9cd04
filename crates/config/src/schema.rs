use anyhow::{anyhow, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub rpc: RpcConfig,
    pub oracle: OracleConfig,
    pub publisher: PublisherConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub http_url: String,
    pub ws_url: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            http_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: String::new(),
        }
    }
}

impl RpcConfig {
    pub fn rpc_http_url(&self) -> Result<String> {
        let trimmed = self.http_url.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("rpc.http_url is not configured"));
        }
        Ok(trimmed.to_string())
    }

    /// WebSocket endpoint, derived from the HTTP endpoint when not set
    /// explicitly (http -> ws, https -> wss).
    pub fn ws_url(&self) -> Result<String> {
        let trimmed = self.ws_url.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
        let http = self.rpc_http_url()?;
        if let Some(rest) = http.strip_prefix("https://") {
            return Ok(format!("wss://{rest}"));
        }
        if let Some(rest) = http.strip_prefix("http://") {
            return Ok(format!("ws://{rest}"));
        }
        Err(anyhow!(
            "cannot derive WebSocket URL from rpc.http_url: {http}"
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Solana cluster the oracle program is deployed to (devnet, testnet,
    /// mainnet). Ignored when `program_id` is set explicitly.
    pub network: String,
    pub program_id: String,
    /// Where product and price reads come from: "rpc" or "mock".
    pub source: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            program_id: String::new(),
            source: "rpc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub listen_address: String,
    pub key_path: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8090".to_string(),
            key_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub blockhash_interval_ms: u64,
    pub stale_horizon_slots: u64,
    pub submit_timeout_ms: u64,
    pub slot_read_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            blockhash_interval_ms: 2_000,
            stale_horizon_slots: 32,
            submit_timeout_ms: 3_000,
            slot_read_timeout_secs: 20,
            reconnect_delay_secs: 3,
        }
    }
}
