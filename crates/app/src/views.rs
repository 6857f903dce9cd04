//! JSON shapes served to publisher clients, mapped from the oracle account
//! model.

use pythian_oracle::{PriceAccountEntry, PriceInfo, ProductAccountEntry};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct ProductView {
    pub account: String,
    pub attr_dict: BTreeMap<String, String>,
    pub price: Vec<PriceView>,
}

#[derive(Debug, Serialize)]
pub struct PriceView {
    pub account: String,
    pub price_exponent: i32,
    pub price_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProductDetailView {
    pub account: String,
    pub attr_dict: BTreeMap<String, String>,
    pub price_accounts: Vec<PriceDetailView>,
}

#[derive(Debug, Serialize)]
pub struct PriceDetailView {
    pub account: String,
    pub price_type: &'static str,
    pub price_exponent: i32,
    pub status: &'static str,
    pub price: i64,
    pub conf: i64,
    pub ema_price: i64,
    pub ema_confidence: i64,
    pub valid_slot: u64,
    pub pub_slot: u64,
    pub prev_slot: u64,
    pub prev_price: i64,
    pub prev_conf: i64,
    pub publisher_accounts: Vec<PublisherView>,
}

#[derive(Debug, Serialize)]
pub struct PublisherView {
    pub account: String,
    pub status: &'static str,
    pub price: i64,
    pub conf: i64,
    pub slot: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResult {
    pub subscription: i64,
}

#[derive(Debug, Serialize)]
pub struct NotifyPriceParams {
    pub price: i64,
    pub conf: u64,
    pub status: &'static str,
    pub valid_slot: u64,
    pub pub_slot: u64,
}

pub fn product_view(product: &ProductAccountEntry, prices: &[PriceAccountEntry]) -> ProductView {
    ProductView {
        account: product.pubkey.to_string(),
        attr_dict: product.attrs.clone(),
        price: prices.iter().map(price_view).collect(),
    }
}

fn price_view(price: &PriceAccountEntry) -> PriceView {
    PriceView {
        account: price.pubkey.to_string(),
        price_exponent: price.exponent,
        price_type: price.price_type.as_label(),
    }
}

pub fn product_detail_view(
    product: &ProductAccountEntry,
    prices: &[PriceAccountEntry],
) -> ProductDetailView {
    ProductDetailView {
        account: product.pubkey.to_string(),
        attr_dict: product.attrs.clone(),
        price_accounts: prices.iter().map(price_detail_view).collect(),
    }
}

fn price_detail_view(price: &PriceAccountEntry) -> PriceDetailView {
    let publisher_accounts = price
        .components
        .iter()
        .filter(|component| !component.publisher.is_zero())
        .map(|component| PublisherView {
            account: component.publisher.to_string(),
            status: component.latest.status.as_label(),
            price: component.latest.price,
            conf: component.latest.conf as i64,
            slot: component.latest.pub_slot,
        })
        .collect();
    PriceDetailView {
        account: price.pubkey.to_string(),
        price_type: price.price_type.as_label(),
        price_exponent: price.exponent,
        status: price.agg.status.as_label(),
        price: price.agg.price,
        conf: price.agg.conf as i64,
        ema_price: price.twap.val,
        ema_confidence: price.twac.val,
        valid_slot: price.valid_slot,
        pub_slot: price.agg.pub_slot,
        prev_slot: price.prev_slot,
        prev_price: price.prev_price,
        prev_conf: price.prev_conf as i64,
        publisher_accounts,
    }
}

/// Notification payload for price subscriptions. `valid_slot` mirrors the
/// aggregate publish slot, matching the wire contract clients expect.
pub fn notify_price_params(info: &PriceInfo) -> NotifyPriceParams {
    NotifyPriceParams {
        price: info.price,
        conf: info.conf,
        status: info.status.as_label(),
        valid_slot: info.pub_slot,
        pub_slot: info.pub_slot,
    }
}
