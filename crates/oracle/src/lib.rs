//! Client-side model of the on-chain price oracle: account layouts, the
//! publish instruction, and read/stream access via RPC or a mock source.

mod client;
pub mod env;
mod instruction;
pub mod layout;
mod stream;
mod types;

pub use self::client::{MockOracleClient, OracleClient, RpcOracleClient};
pub use self::instruction::{upd_price, UpdPriceCommand, CLOCK_SYSVAR, COMMAND_UPD_PRICE};
pub use self::stream::PriceStream;
pub use self::types::{
    Ema, NotFound, PriceAccountEntry, PriceComponent, PriceInfo, PriceStatus, PriceType,
    ProductAccountEntry,
};
