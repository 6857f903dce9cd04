//! The five publisher-facing JSON-RPC methods.

use futures_util::FutureExt;
use pythian_chain::Pubkey;
use pythian_jsonrpc::{
    error_response, invalid_params, result_response, Mux, NotifyError, Peer, Request, Response,
};
use pythian_oracle::{
    upd_price, NotFound, OracleClient, PriceAccountEntry, PriceStatus, ProductAccountEntry,
    UpdPriceCommand,
};
use pythian_schedule::{Buffer, SlotMonitor};
use pythian_telemetry::PublishMetrics;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::views::{
    notify_price_params, product_detail_view, product_view, ProductDetailView, ProductView,
    SubscriptionResult,
};

const ERR_UNKNOWN_SYMBOL: i64 = -32000;
const ERR_NOT_READY: i64 = -32002;

pub struct PublishHandler {
    client: Arc<OracleClient>,
    buffer: Arc<Buffer>,
    publisher: Pubkey,
    program: Pubkey,
    slots: Arc<SlotMonitor>,
    metrics: Arc<PublishMetrics>,
    subscription_nonce: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct AccountParams {
    account: Pubkey,
}

#[derive(Debug, Deserialize)]
struct UpdatePriceParams {
    account: Pubkey,
    #[serde(default)]
    price: i64,
    #[serde(default)]
    conf: u64,
    #[serde(default)]
    status: String,
}

impl PublishHandler {
    pub fn new(
        client: Arc<OracleClient>,
        buffer: Arc<Buffer>,
        publisher: Pubkey,
        program: Pubkey,
        slots: Arc<SlotMonitor>,
        metrics: Arc<PublishMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            buffer,
            publisher,
            program,
            slots,
            metrics,
            subscription_nonce: AtomicI64::new(1),
        })
    }

    pub fn register(self: &Arc<Self>, mux: &mut Mux) {
        let handler = self.clone();
        mux.handle_fn("get_product_list", move |request, _peer| {
            let handler = handler.clone();
            async move { handler.get_product_list(request).await }.boxed()
        });
        let handler = self.clone();
        mux.handle_fn("get_product", move |request, _peer| {
            let handler = handler.clone();
            async move { handler.get_product(request).await }.boxed()
        });
        let handler = self.clone();
        mux.handle_fn("get_all_products", move |request, _peer| {
            let handler = handler.clone();
            async move { handler.get_all_products(request).await }.boxed()
        });
        let handler = self.clone();
        mux.handle_fn("update_price", move |request, _peer| {
            let handler = handler.clone();
            async move { handler.update_price(request).await }.boxed()
        });
        let handler = self.clone();
        mux.handle_fn("subscribe_price", move |request, peer| {
            let handler = handler.clone();
            async move { handler.subscribe_price(request, peer).await }.boxed()
        });
    }

    async fn get_product_list(&self, request: Request) -> Option<Response> {
        match self.all_products_and_prices().await {
            Err(fetch_error) => error_response(
                request.id,
                ERR_NOT_READY,
                format!("failed to get products: {fetch_error:#}"),
            ),
            Ok((products, mut prices_per_product)) => {
                let views: Vec<ProductView> = products
                    .iter()
                    .map(|product| {
                        let prices = prices_per_product
                            .remove(&product.pubkey)
                            .unwrap_or_default();
                        product_view(product, &prices)
                    })
                    .collect();
                encode_result(request.id, &views)
            }
        }
    }

    async fn get_all_products(&self, request: Request) -> Option<Response> {
        match self.all_products_and_prices().await {
            Err(fetch_error) => error_response(
                request.id,
                ERR_NOT_READY,
                format!("failed to get products: {fetch_error:#}"),
            ),
            Ok((products, mut prices_per_product)) => {
                let views: Vec<ProductDetailView> = products
                    .iter()
                    .map(|product| {
                        let prices = prices_per_product
                            .remove(&product.pubkey)
                            .unwrap_or_default();
                        product_detail_view(product, &prices)
                    })
                    .collect();
                encode_result(request.id, &views)
            }
        }
    }

    async fn get_product(&self, request: Request) -> Option<Response> {
        let Ok(params) = decode_params::<AccountParams>(&request) else {
            return invalid_params(request.id);
        };

        let entry = match self.client.get_product_account(params.account).await {
            Ok(entry) => entry,
            Err(fetch_error) if fetch_error.downcast_ref::<NotFound>().is_some() => {
                return error_response(request.id, ERR_UNKNOWN_SYMBOL, "unknown symbol");
            }
            Err(fetch_error) => {
                return error_response(
                    request.id,
                    ERR_NOT_READY,
                    format!("failed to get product: {fetch_error:#}"),
                );
            }
        };
        let prices = match self
            .client
            .get_price_accounts_recursive(&[entry.first_price])
            .await
        {
            Ok(prices) => prices,
            Err(fetch_error) if fetch_error.downcast_ref::<NotFound>().is_some() => {
                return error_response(request.id, ERR_UNKNOWN_SYMBOL, "unknown symbol");
            }
            Err(fetch_error) => {
                return error_response(
                    request.id,
                    ERR_NOT_READY,
                    format!("failed to get price accs: {fetch_error:#}"),
                );
            }
        };
        encode_result(request.id, &product_detail_view(&entry, &prices))
    }

    async fn update_price(&self, request: Request) -> Option<Response> {
        let Ok(params) = decode_params::<UpdatePriceParams>(&request) else {
            return invalid_params(request.id);
        };
        // Zero price and confidence are legitimate publisher observations;
        // only the account key and status are mandatory.
        if params.account.is_zero() || params.status.trim().is_empty() {
            return invalid_params(request.id);
        }

        let command = UpdPriceCommand {
            status: PriceStatus::from_label(&params.status),
            price: params.price,
            conf: params.conf,
            pub_slot: self.slots.current_slot(),
        };
        let instruction = upd_price(self.program, self.publisher, params.account, &command);
        self.buffer.push_update(instruction);

        result_response(request.id, json!(0))
    }

    async fn subscribe_price(&self, request: Request, peer: Option<Peer>) -> Option<Response> {
        if request.is_notification() {
            return None;
        }
        let Ok(params) = decode_params::<AccountParams>(&request) else {
            return invalid_params(request.id);
        };
        if params.account.is_zero() {
            return invalid_params(request.id);
        }
        let Some(peer) = peer else {
            return error_response(
                request.id,
                ERR_NOT_READY,
                "subscriptions require a WebSocket session",
            );
        };

        let subscription = self.next_subscription_id();
        let client = self.client.clone();
        let metrics = self.metrics.clone();
        let account = params.account;
        tokio::spawn(async move {
            stream_price_notifications(client, metrics, account, peer).await;
        });

        encode_result(request.id, &SubscriptionResult { subscription })
    }

    async fn all_products_and_prices(
        &self,
    ) -> anyhow::Result<(
        Vec<ProductAccountEntry>,
        HashMap<Pubkey, Vec<PriceAccountEntry>>,
    )> {
        let products = self.client.get_all_product_accounts().await?;
        let price_keys: Vec<Pubkey> = products
            .iter()
            .map(|product| product.first_price)
            .filter(|key| !key.is_zero())
            .collect();
        let prices = self.client.get_price_accounts_recursive(&price_keys).await?;
        let mut prices_per_product: HashMap<Pubkey, Vec<PriceAccountEntry>> = HashMap::new();
        for price in prices {
            prices_per_product
                .entry(price.product)
                .or_default()
                .push(price);
        }
        Ok((products, prices_per_product))
    }

    fn next_subscription_id(&self) -> i64 {
        // increment-before-use: the nonce starts at 1, so ids begin at 2
        self.subscription_nonce.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Forwards every stream update for `account` to the subscriber until the
/// connection goes away.
async fn stream_price_notifications(
    client: Arc<OracleClient>,
    metrics: Arc<PublishMetrics>,
    account: Pubkey,
    peer: Peer,
) {
    let mut stream = match client.stream_price_accounts().await {
        Ok(stream) => stream,
        Err(stream_error) => {
            warn!(account = %account, error = %stream_error, "failed to open price stream");
            return;
        }
    };
    while let Some(entry) = stream.recv().await {
        if entry.pubkey != account {
            continue;
        }
        let params = match serde_json::to_value(notify_price_params(&entry.agg)) {
            Ok(params) => params,
            Err(encode_error) => {
                warn!(error = %encode_error, "failed to encode price notification");
                continue;
            }
        };
        match peer.notify("notify_price", params).await {
            Ok(()) => metrics.record_notification_delivered(),
            Err(NotifyError::Closed) => {
                debug!(account = %account, "subscriber connection closed");
                break;
            }
            Err(NotifyError::Cancelled) => break,
        }
    }
}

fn decode_params<T: DeserializeOwned>(request: &Request) -> Result<T, serde_json::Error> {
    let params = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(params)
}

fn encode_result<T: Serialize>(id: Option<Value>, value: &T) -> Option<Response> {
    match serde_json::to_value(value) {
        Ok(encoded) => result_response(id, encoded),
        Err(encode_error) => error_response(
            id,
            ERR_NOT_READY,
            format!("failed to encode response: {encode_error}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pythian_jsonrpc::WsMessage;
    use std::time::Duration;

    fn oracle_program() -> Pubkey {
        Pubkey::new([0xaa; 32])
    }

    struct TestHarness {
        handler: Arc<PublishHandler>,
        mux: Mux,
        buffer: Arc<Buffer>,
        _tick_rx: tokio::sync::mpsc::Receiver<pythian_schedule::SlotTick>,
    }

    fn harness() -> TestHarness {
        let metrics = Arc::new(PublishMetrics::new());
        let buffer = Arc::new(Buffer::new(metrics.clone()));
        let client = Arc::new(OracleClient::mock(oracle_program()));
        let (slots, tick_rx) = SlotMonitor::new(
            "ws://127.0.0.1:1/unreachable".to_string(),
            Duration::from_secs(20),
            Duration::from_secs(3),
            metrics.clone(),
        );
        let handler = PublishHandler::new(
            client,
            buffer.clone(),
            Pubkey::new([1; 32]),
            oracle_program(),
            Arc::new(slots),
            metrics,
        );
        let mut mux = Mux::new();
        handler.register(&mut mux);
        TestHarness {
            handler,
            mux,
            buffer,
            _tick_rx: tick_rx,
        }
    }

    fn request(id: Value, method: &str, params: Value) -> Request {
        Request {
            id: Some(id),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn mock_sol_price_account() -> Pubkey {
        Pubkey::new([0x12; 32])
    }

    #[tokio::test]
    async fn get_product_unknown_symbol() {
        let harness = harness();
        let missing = Pubkey::new([0x77; 32]);
        let response = harness
            .mux
            .serve(
                request(json!(1), "get_product", json!({ "account": missing.to_string() })),
                None,
            )
            .await
            .expect("response");
        let encoded = serde_json::to_value(&response).expect("serialize");
        assert_eq!(
            encoded,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "unknown symbol" }
            })
        );
    }

    #[tokio::test]
    async fn get_product_returns_detail_record() {
        let harness = harness();
        let products = harness
            .handler
            .client
            .get_all_product_accounts()
            .await
            .expect("products");
        let response = harness
            .mux
            .serve(
                request(
                    json!(1),
                    "get_product",
                    json!({ "account": products[0].pubkey.to_string() }),
                ),
                None,
            )
            .await
            .expect("response");
        let result = response.result.expect("result");
        assert_eq!(result["account"], json!(products[0].pubkey.to_string()));
        assert_eq!(
            result["price_accounts"][0]["account"],
            json!(products[0].first_price.to_string())
        );
        assert_eq!(result["price_accounts"][0]["status"], json!("trading"));
    }

    #[tokio::test]
    async fn get_product_rejects_malformed_params() {
        let harness = harness();
        let response = harness
            .mux
            .serve(
                request(json!(1), "get_product", json!({ "account": 17 })),
                None,
            )
            .await
            .expect("response");
        assert_eq!(response.error.expect("error").code, -32602);
    }

    #[tokio::test]
    async fn get_product_list_returns_compact_records() {
        let harness = harness();
        let response = harness
            .mux
            .serve(request(json!(1), "get_product_list", json!(null)), None)
            .await
            .expect("response");
        let result = response.result.expect("result");
        let products = result.as_array().expect("array");
        assert_eq!(products.len(), 2);
        for product in products {
            assert!(product.get("attr_dict").is_some());
            assert!(product["price"][0].get("price_exponent").is_some());
            assert!(product["price"][0].get("status").is_none());
        }
    }

    #[tokio::test]
    async fn get_all_products_returns_detail_records() {
        let harness = harness();
        let response = harness
            .mux
            .serve(request(json!(1), "get_all_products", json!(null)), None)
            .await
            .expect("response");
        let result = response.result.expect("result");
        let products = result.as_array().expect("array");
        assert_eq!(products.len(), 2);
        for product in products {
            assert!(product["price_accounts"][0].get("publisher_accounts").is_some());
        }
    }

    #[tokio::test]
    async fn update_price_buffers_one_entry() {
        let harness = harness();
        let account = mock_sol_price_account();
        let response = harness
            .mux
            .serve(
                request(
                    json!("x"),
                    "update_price",
                    json!({
                        "account": account.to_string(),
                        "price": 100,
                        "conf": 1,
                        "status": "trading",
                    }),
                ),
                None,
            )
            .await
            .expect("response");
        let encoded = serde_json::to_value(&response).expect("serialize");
        assert_eq!(encoded, json!({ "jsonrpc": "2.0", "id": "x", "result": 0 }));

        assert_eq!(harness.buffer.pending(), 1);
        let mut builder = harness.buffer.flush(0).expect("buffered update");
        builder
            .set_fee_payer(Pubkey::new([1; 32]))
            .set_recent_blockhash(pythian_chain::Blockhash::new([9; 32]));
        let tx = builder.build().expect("build");
        let command = UpdPriceCommand::decode(&tx.message.instructions[0].data).expect("payload");
        assert_eq!(command.price, 100);
        assert_eq!(command.conf, 1);
        assert_eq!(command.status, PriceStatus::Trading);
        assert_eq!(command.pub_slot, harness.handler.slots.current_slot());
    }

    #[tokio::test]
    async fn update_price_accepts_zero_price_and_conf() {
        let harness = harness();
        let response = harness
            .mux
            .serve(
                request(
                    json!(1),
                    "update_price",
                    json!({
                        "account": mock_sol_price_account().to_string(),
                        "price": 0,
                        "conf": 0,
                        "status": "trading",
                    }),
                ),
                None,
            )
            .await
            .expect("response");
        assert!(response.error.is_none());
        assert_eq!(harness.buffer.pending(), 1);
    }

    #[tokio::test]
    async fn update_price_rejects_zero_account_and_empty_status() {
        let harness = harness();
        for params in [
            json!({ "account": Pubkey::default().to_string(), "price": 1, "conf": 1, "status": "trading" }),
            json!({ "account": mock_sol_price_account().to_string(), "price": 1, "conf": 1, "status": "" }),
            json!({ "price": 1, "conf": 1, "status": "trading" }),
        ] {
            let response = harness
                .mux
                .serve(request(json!(1), "update_price", params), None)
                .await
                .expect("response");
            assert_eq!(response.error.expect("error").code, -32602);
            assert_eq!(harness.buffer.pending(), 0);
        }
    }

    #[tokio::test]
    async fn subscribe_price_without_id_is_suppressed() {
        let harness = harness();
        let (peer, _rx, _closed) = Peer::standalone(4);
        let response = harness
            .mux
            .serve(
                Request {
                    id: None,
                    method: "subscribe_price".to_string(),
                    params: Some(json!({ "account": mock_sol_price_account().to_string() })),
                },
                Some(peer),
            )
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn subscribe_price_over_http_is_rejected() {
        let harness = harness();
        let response = harness
            .mux
            .serve(
                request(
                    json!(7),
                    "subscribe_price",
                    json!({ "account": mock_sol_price_account().to_string() }),
                ),
                None,
            )
            .await
            .expect("response");
        assert_eq!(response.error.expect("error").code, -32002);
    }

    #[tokio::test]
    async fn first_subscription_id_is_two() {
        let harness = harness();
        let (peer, _rx, _closed) = Peer::standalone(4);
        let response = harness
            .mux
            .serve(
                request(
                    json!(7),
                    "subscribe_price",
                    json!({ "account": mock_sol_price_account().to_string() }),
                ),
                Some(peer),
            )
            .await
            .expect("response");
        let encoded = serde_json::to_value(&response).expect("serialize");
        assert_eq!(
            encoded,
            json!({ "jsonrpc": "2.0", "id": 7, "result": { "subscription": 2 } })
        );
    }

    #[tokio::test]
    async fn concurrent_subscription_ids_are_dense_and_unique() {
        let harness = harness();
        let handler = harness.handler.clone();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let handler = handler.clone();
            tasks.spawn(async move { handler.next_subscription_id() });
        }
        let mut ids = Vec::new();
        while let Some(id) = tasks.join_next().await {
            ids.push(id.expect("join"));
        }
        ids.sort_unstable();
        let expected: Vec<i64> = (2..=17).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn subscription_pushes_notify_price_frames() {
        let harness = harness();
        let (peer, mut rx, _closed) = Peer::standalone(16);
        harness
            .mux
            .serve(
                request(
                    json!(7),
                    "subscribe_price",
                    json!({ "account": mock_sol_price_account().to_string() }),
                ),
                Some(peer),
            )
            .await
            .expect("response");

        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification before timeout")
            .expect("open queue");
        let WsMessage::Text(text) = frame else {
            panic!("expected a text frame");
        };
        let decoded: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(decoded["method"], json!("notify_price"));
        assert_eq!(decoded["id"], Value::Null);
        for field in ["price", "conf", "status", "valid_slot", "pub_slot"] {
            assert!(decoded["params"].get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn subscribe_rejects_zero_account() {
        let harness = harness();
        let (peer, _rx, _closed) = Peer::standalone(4);
        let response = harness
            .mux
            .serve(
                request(
                    json!(7),
                    "subscribe_price",
                    json!({ "account": Pubkey::default().to_string() }),
                ),
                Some(peer),
            )
            .await
            .expect("response");
        assert_eq!(response.error.expect("error").code, -32602);
    }
}
