//! Cluster environments the oracle program is deployed to.

use anyhow::{anyhow, Result};
use pythian_chain::Pubkey;

/// pubkey!("FsJ3A3u2vn5cTVofAjvy6y5kwABJAqYWpe4975bi2epH")
pub const MAINNET_PROGRAM: Pubkey = Pubkey::new([
    220, 229, 235, 225, 228, 156, 59, 159, 17, 76, 181, 84, 76, 80, 169, 158, 192, 214, 146, 214,
    63, 86, 121, 90, 224, 41, 172, 131, 217, 234, 139, 226,
]);

/// pubkey!("gSbePebfvPy7tRqimPoVecS2UsBvYv46ynrzWocc92s")
pub const DEVNET_PROGRAM: Pubkey = Pubkey::new([
    10, 26, 152, 51, 163, 118, 85, 43, 86, 183, 202, 13, 237, 25, 41, 23, 0, 87, 232, 39, 160,
    198, 39, 244, 182, 71, 185, 238, 144, 153, 175, 180,
]);

/// pubkey!("8tfDNiaEyrV6Q1U4DEXrEigs9DoDtkugzFbybENEbCDz")
pub const TESTNET_PROGRAM: Pubkey = Pubkey::new([
    117, 61, 163, 65, 197, 233, 227, 200, 140, 19, 64, 169, 171, 17, 214, 13, 101, 41, 99, 1, 100,
    174, 194, 7, 175, 86, 62, 175, 187, 219, 14, 253,
]);

pub fn program_for_network(network: &str) -> Result<Pubkey> {
    match network {
        "mainnet" => Ok(MAINNET_PROGRAM),
        "devnet" => Ok(DEVNET_PROGRAM),
        "testnet" => Ok(TESTNET_PROGRAM),
        other => Err(anyhow!("unsupported network: {other}")),
    }
}
