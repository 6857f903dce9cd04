use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use crate::transaction::Transaction;
use crate::types::{Blockhash, Signature};

/// Consistency level attached to chain reads and submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commitment {
    Processed,
    Confirmed,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
        }
    }
}

/// Latest observed blockhash together with the block height it stays valid
/// for. Copied out to readers wholesale; never partially updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashSnapshot {
    pub blockhash: Blockhash,
    pub last_valid_block_height: u64,
}

/// Thin JSON-RPC client for the Solana HTTP endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Single JSON-RPC call; returns the `result` value or the error payload
    /// as an `Err`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                anyhow!(
                    "rpc request failed method={} class={}: {}",
                    method,
                    classify_request_error(&error),
                    error
                )
            })?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "rpc status={} method={} body={}",
                status,
                method,
                body_text
            ));
        }
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("rpc response invalid JSON method={method}"))?;
        if let Some(error_payload) = body.get("error") {
            if !error_payload.is_null() {
                return Err(anyhow!("rpc error method={} payload={}", method, error_payload));
            }
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("rpc response missing result method={method}"))
    }

    pub async fn get_latest_blockhash(&self, commitment: Commitment) -> Result<BlockhashSnapshot> {
        let result = self
            .request(
                "getLatestBlockhash",
                json!([{ "commitment": commitment.as_str() }]),
            )
            .await?;
        let value = result
            .get("value")
            .ok_or_else(|| anyhow!("getLatestBlockhash returned no value"))?;
        let blockhash: Blockhash = value
            .get("blockhash")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("getLatestBlockhash returned no blockhash"))?
            .parse()?;
        let last_valid_block_height = value
            .get("lastValidBlockHeight")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("getLatestBlockhash returned no lastValidBlockHeight"))?;
        Ok(BlockhashSnapshot {
            blockhash,
            last_valid_block_height,
        })
    }

    /// Submits a signed transaction, skipping preflight simulation.
    pub async fn send_transaction(
        &self,
        transaction: &Transaction,
        preflight_commitment: Commitment,
    ) -> Result<Signature> {
        let encoded = BASE64_STANDARD.encode(transaction.serialize());
        let result = self
            .request(
                "sendTransaction",
                json!([
                    encoded,
                    {
                        "encoding": "base64",
                        "skipPreflight": true,
                        "preflightCommitment": preflight_commitment.as_str(),
                    }
                ]),
            )
            .await?;
        result
            .as_str()
            .ok_or_else(|| anyhow!("sendTransaction returned a non-string signature"))?
            .parse()
    }
}

pub fn classify_request_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_request() {
        "request"
    } else if error.is_body() {
        "body"
    } else if error.is_decode() {
        "decode"
    } else {
        "other"
    }
}
