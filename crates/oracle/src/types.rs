use pythian_chain::Pubkey;
use std::collections::BTreeMap;
use std::fmt;

/// Aggregation state of a price account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceStatus {
    #[default]
    Unknown,
    Trading,
    Auction,
    Halted,
}

impl PriceStatus {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => Self::Trading,
            3 => Self::Auction,
            2 => Self::Halted,
            _ => Self::Unknown,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Trading => 1,
            Self::Halted => 2,
            Self::Auction => 3,
        }
    }

    /// Maps a wire string to a status; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "trading" => Self::Trading,
            "auction" => Self::Auction,
            "halted" => Self::Halted,
            _ => Self::Unknown,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Trading => "trading",
            Self::Auction => "auction",
            Self::Halted => "halted",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceType {
    #[default]
    Unknown,
    Price,
}

impl PriceType {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => Self::Price,
            _ => Self::Unknown,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Unknown => "unknown",
        }
    }
}

/// One (price, confidence, status) observation pinned to a publish slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriceInfo {
    pub price: i64,
    pub conf: u64,
    pub status: PriceStatus,
    pub corp_act: u32,
    pub pub_slot: u64,
}

/// Exponential moving average with its raw numerator/denominator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ema {
    pub val: i64,
    pub numer: i64,
    pub denom: i64,
}

/// Per-publisher component slot inside a price account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriceComponent {
    pub publisher: Pubkey,
    pub agg: PriceInfo,
    pub latest: PriceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PriceAccountEntry {
    pub pubkey: Pubkey,
    pub price_type: PriceType,
    pub exponent: i32,
    pub num_components: u32,
    pub last_slot: u64,
    pub valid_slot: u64,
    pub twap: Ema,
    pub twac: Ema,
    pub timestamp: i64,
    pub min_publishers: u8,
    pub product: Pubkey,
    pub next: Pubkey,
    pub prev_slot: u64,
    pub prev_price: i64,
    pub prev_conf: u64,
    pub prev_timestamp: i64,
    pub agg: PriceInfo,
    pub components: Vec<PriceComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductAccountEntry {
    pub pubkey: Pubkey,
    pub first_price: Pubkey,
    pub attrs: BTreeMap<String, String>,
}

/// Returned when a requested product or price account does not exist on
/// chain. Callers match on this to map the condition onto their own error
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound;

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("account not found")
    }
}

impl std::error::Error for NotFound {}
