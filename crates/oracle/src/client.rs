use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use pythian_chain::{Pubkey, RpcClient};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use crate::layout::{self, ACCOUNT_TYPE_PRICE, ACCOUNT_TYPE_PRODUCT};
use crate::stream::{spawn_mock_stream, spawn_program_stream, PriceStream};
use crate::types::{
    NotFound, PriceAccountEntry, PriceComponent, PriceInfo, PriceStatus, PriceType,
    ProductAccountEntry,
};

/// Read access to the oracle's product and price accounts. `Rpc` talks to a
/// Solana endpoint; `Mock` serves canned accounts and a synthetic price feed
/// so the full pipeline can run without a chain.
pub enum OracleClient {
    Rpc(RpcOracleClient),
    Mock(MockOracleClient),
}

impl OracleClient {
    pub fn rpc(rpc: RpcClient, ws_url: String, program: Pubkey) -> Self {
        Self::Rpc(RpcOracleClient {
            rpc,
            ws_url,
            program,
        })
    }

    pub fn mock(program: Pubkey) -> Self {
        Self::Mock(MockOracleClient::new(program))
    }

    pub fn program(&self) -> Pubkey {
        match self {
            Self::Rpc(client) => client.program,
            Self::Mock(client) => client.program,
        }
    }

    pub async fn get_all_product_accounts(&self) -> Result<Vec<ProductAccountEntry>> {
        match self {
            Self::Rpc(client) => client.get_all_product_accounts().await,
            Self::Mock(client) => Ok(client.products.clone()),
        }
    }

    /// Fails with [`NotFound`] when the account does not exist.
    pub async fn get_product_account(&self, key: Pubkey) -> Result<ProductAccountEntry> {
        match self {
            Self::Rpc(client) => client.get_product_account(key).await,
            Self::Mock(client) => client
                .products
                .iter()
                .find(|product| product.pubkey == key)
                .cloned()
                .ok_or_else(|| NotFound.into()),
        }
    }

    /// Fetches the given price accounts, following each `next` link until the
    /// chain ends. Zero keys are skipped; a dangling reference fails with
    /// [`NotFound`].
    pub async fn get_price_accounts_recursive(
        &self,
        keys: &[Pubkey],
    ) -> Result<Vec<PriceAccountEntry>> {
        match self {
            Self::Rpc(client) => client.get_price_accounts_recursive(keys).await,
            Self::Mock(client) => client.price_accounts_recursive(keys),
        }
    }

    pub async fn stream_price_accounts(&self) -> Result<PriceStream> {
        match self {
            Self::Rpc(client) => Ok(spawn_program_stream(
                client.ws_url.clone(),
                client.program,
            )),
            Self::Mock(client) => Ok(spawn_mock_stream(
                client.prices.clone(),
                client.stream_interval,
            )),
        }
    }
}

pub struct RpcOracleClient {
    rpc: RpcClient,
    ws_url: String,
    program: Pubkey,
}

impl RpcOracleClient {
    async fn get_all_product_accounts(&self) -> Result<Vec<ProductAccountEntry>> {
        let result = self
            .rpc
            .request(
                "getProgramAccounts",
                json!([
                    self.program.to_string(),
                    { "encoding": "base64", "commitment": "confirmed" }
                ]),
            )
            .await
            .context("failed to list oracle program accounts")?;
        let accounts = result
            .as_array()
            .ok_or_else(|| anyhow!("getProgramAccounts returned a non-array result"))?;

        let mut products = Vec::new();
        for keyed in accounts {
            let pubkey: Pubkey = keyed
                .get("pubkey")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("program account is missing its pubkey"))?
                .parse()?;
            let data = decode_account_data(keyed.get("account"))?;
            if layout::account_type(&data) == Some(ACCOUNT_TYPE_PRODUCT) {
                products.push(layout::decode_product(pubkey, &data)?);
            }
        }
        Ok(products)
    }

    async fn get_product_account(&self, key: Pubkey) -> Result<ProductAccountEntry> {
        let data = self.get_account_data(key).await?;
        if layout::account_type(&data) != Some(ACCOUNT_TYPE_PRODUCT) {
            bail!("account {key} is not a product account");
        }
        layout::decode_product(key, &data)
    }

    async fn get_price_accounts_recursive(
        &self,
        keys: &[Pubkey],
    ) -> Result<Vec<PriceAccountEntry>> {
        let mut pending: VecDeque<Pubkey> =
            keys.iter().copied().filter(|key| !key.is_zero()).collect();
        let mut visited: HashSet<Pubkey> = pending.iter().copied().collect();
        let mut entries = Vec::new();
        while let Some(key) = pending.pop_front() {
            let data = self.get_account_data(key).await?;
            if layout::account_type(&data) != Some(ACCOUNT_TYPE_PRICE) {
                bail!("account {key} is not a price account");
            }
            let entry = layout::decode_price(key, &data)?;
            if !entry.next.is_zero() && visited.insert(entry.next) {
                pending.push_back(entry.next);
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn get_account_data(&self, key: Pubkey) -> Result<Vec<u8>> {
        let result = self
            .rpc
            .request(
                "getAccountInfo",
                json!([
                    key.to_string(),
                    { "encoding": "base64", "commitment": "confirmed" }
                ]),
            )
            .await
            .with_context(|| format!("failed to fetch account {key}"))?;
        let value = result
            .get("value")
            .ok_or_else(|| anyhow!("getAccountInfo returned no value for {key}"))?;
        if value.is_null() {
            return Err(NotFound.into());
        }
        decode_account_data(Some(value))
    }
}

fn decode_account_data(account: Option<&Value>) -> Result<Vec<u8>> {
    let encoded = account
        .and_then(|account| account.get("data"))
        .and_then(|data| data.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("account payload is missing base64 data"))?;
    BASE64_STANDARD
        .decode(encoded)
        .context("account data is not valid base64")
}

/// Canned oracle universe: two products, each with one trading price account
/// and a single publisher component.
pub struct MockOracleClient {
    program: Pubkey,
    products: Vec<ProductAccountEntry>,
    prices: Vec<PriceAccountEntry>,
    stream_interval: Duration,
}

impl MockOracleClient {
    pub fn new(program: Pubkey) -> Self {
        let sol_product = Pubkey::new([0x11; 32]);
        let sol_price = Pubkey::new([0x12; 32]);
        let btc_product = Pubkey::new([0x21; 32]);
        let btc_price = Pubkey::new([0x22; 32]);
        let publisher = Pubkey::new([0x31; 32]);

        let products = vec![
            mock_product(sol_product, sol_price, "Crypto.SOL/USD", "SOL"),
            mock_product(btc_product, btc_price, "Crypto.BTC/USD", "BTC"),
        ];
        let prices = vec![
            mock_price(sol_price, sol_product, publisher, 98_765_432_100),
            mock_price(btc_price, btc_product, publisher, 6_543_210_987_654),
        ];
        Self {
            program,
            products,
            prices,
            stream_interval: Duration::from_millis(400),
        }
    }

    fn price_accounts_recursive(&self, keys: &[Pubkey]) -> Result<Vec<PriceAccountEntry>> {
        let mut entries = Vec::new();
        for key in keys.iter().filter(|key| !key.is_zero()) {
            let entry = self
                .prices
                .iter()
                .find(|price| price.pubkey == *key)
                .cloned()
                .ok_or_else(|| anyhow::Error::from(NotFound))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn mock_product(
    pubkey: Pubkey,
    first_price: Pubkey,
    symbol: &str,
    base: &str,
) -> ProductAccountEntry {
    let mut attrs = BTreeMap::new();
    attrs.insert("symbol".to_string(), symbol.to_string());
    attrs.insert("asset_type".to_string(), "Crypto".to_string());
    attrs.insert("base".to_string(), base.to_string());
    attrs.insert("quote_currency".to_string(), "USD".to_string());
    ProductAccountEntry {
        pubkey,
        first_price,
        attrs,
    }
}

fn mock_price(
    pubkey: Pubkey,
    product: Pubkey,
    publisher: Pubkey,
    price: i64,
) -> PriceAccountEntry {
    let info = PriceInfo {
        price,
        conf: (price / 1_000) as u64,
        status: PriceStatus::Trading,
        corp_act: 0,
        pub_slot: 1_000,
    };
    PriceAccountEntry {
        pubkey,
        price_type: PriceType::Price,
        exponent: -8,
        num_components: 1,
        last_slot: 1_000,
        valid_slot: 1_000,
        timestamp: 0,
        min_publishers: 1,
        product,
        prev_slot: 999,
        prev_price: price - 1,
        prev_conf: (price / 1_000) as u64,
        prev_timestamp: 0,
        agg: info,
        components: vec![PriceComponent {
            publisher,
            agg: info,
            latest: info,
        }],
        ..PriceAccountEntry::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_client() -> OracleClient {
        OracleClient::mock(Pubkey::new([0xaa; 32]))
    }

    #[tokio::test]
    async fn mock_lists_products_with_first_price_links() {
        let client = mock_client();
        let products = client.get_all_product_accounts().await.expect("products");
        assert_eq!(products.len(), 2);
        for product in &products {
            assert!(!product.first_price.is_zero());
            assert!(product.attrs.contains_key("symbol"));
        }
    }

    #[tokio::test]
    async fn mock_product_lookup_misses_with_not_found() {
        let client = mock_client();
        let error = client
            .get_product_account(Pubkey::new([0x77; 32]))
            .await
            .expect_err("missing product");
        assert!(error.downcast_ref::<NotFound>().is_some());
    }

    #[tokio::test]
    async fn mock_price_accounts_resolve_by_product_link() {
        let client = mock_client();
        let products = client.get_all_product_accounts().await.expect("products");
        let prices = client
            .get_price_accounts_recursive(&[products[0].first_price])
            .await
            .expect("prices");
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].product, products[0].pubkey);
        assert_eq!(prices[0].agg.status, PriceStatus::Trading);
    }

    #[tokio::test]
    async fn zero_keys_are_skipped_in_recursive_lookup() {
        let client = mock_client();
        let prices = client
            .get_price_accounts_recursive(&[Pubkey::default()])
            .await
            .expect("prices");
        assert!(prices.is_empty());
    }

    #[test]
    fn account_data_decoder_requires_base64_tuple() {
        assert!(decode_account_data(None).is_err());
        let value = json!({ "data": ["aGVsbG8=", "base64"] });
        assert_eq!(decode_account_data(Some(&value)).expect("decode"), b"hello");
    }
}
