//! The publish-side instruction: `upd_price`, as submitted by a publisher
//! against its assigned price account.

use anyhow::{bail, Result};
use pythian_chain::{AccountMeta, Instruction, Pubkey};

use crate::layout::VERSION;
use crate::types::PriceStatus;

/// pubkey!("SysvarC1ock11111111111111111111111111111111")
pub const CLOCK_SYSVAR: Pubkey = Pubkey::new([
    6, 167, 213, 23, 24, 199, 116, 201, 40, 86, 99, 152, 105, 29, 94, 182, 139, 94, 184, 163, 155,
    75, 109, 92, 115, 85, 91, 33, 0, 0, 0, 0,
]);

/// Command index of `upd_price` in the oracle program's dispatch table.
pub const COMMAND_UPD_PRICE: i32 = 7;

const UPD_PRICE_LEN: usize = 40;

/// Payload of an `upd_price` instruction: the publisher's observation pinned
/// to the slot it was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdPriceCommand {
    pub status: PriceStatus,
    pub price: i64,
    pub conf: u64,
    pub pub_slot: u64,
}

impl UpdPriceCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UPD_PRICE_LEN);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&COMMAND_UPD_PRICE.to_le_bytes());
        out.extend_from_slice(&self.status.as_u32().to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.conf.to_le_bytes());
        out.extend_from_slice(&self.pub_slot.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != UPD_PRICE_LEN {
            bail!(
                "upd_price payload must be {UPD_PRICE_LEN} bytes, got {}",
                data.len()
            );
        }
        let read_u32 =
            |offset: usize| u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4 bytes"));
        let read_u64 =
            |offset: usize| u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"));
        let version = read_u32(0);
        if version != VERSION {
            bail!("unsupported upd_price version {version}");
        }
        let command = read_u32(4) as i32;
        if command != COMMAND_UPD_PRICE {
            bail!("payload is not upd_price (command {command})");
        }
        Ok(Self {
            status: PriceStatus::from_u32(read_u32(8)),
            price: read_u64(16) as i64,
            conf: read_u64(24),
            pub_slot: read_u64(32),
        })
    }
}

/// Builds the `upd_price` instruction: publisher (signer, writable), the
/// target price account (writable), and the clock sysvar.
pub fn upd_price(
    program: Pubkey,
    publisher: Pubkey,
    price_account: Pubkey,
    command: &UpdPriceCommand,
) -> Instruction {
    Instruction::new(
        program,
        vec![
            AccountMeta::writable(publisher, true),
            AccountMeta::writable(price_account, false),
            AccountMeta::readonly(CLOCK_SYSVAR, false),
        ],
        command.encode(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_encode_decode_round_trip() {
        let command = UpdPriceCommand {
            status: PriceStatus::Trading,
            price: -1234,
            conf: 56,
            pub_slot: 7890,
        };
        let decoded = UpdPriceCommand::decode(&command.encode()).expect("decode");
        assert_eq!(decoded, command);
    }

    #[test]
    fn zero_price_and_conf_are_representable() {
        let command = UpdPriceCommand {
            status: PriceStatus::Trading,
            price: 0,
            conf: 0,
            pub_slot: 1,
        };
        let decoded = UpdPriceCommand::decode(&command.encode()).expect("decode");
        assert_eq!(decoded.price, 0);
        assert_eq!(decoded.conf, 0);
    }

    #[test]
    fn decode_rejects_other_commands() {
        let mut data = UpdPriceCommand {
            status: PriceStatus::Trading,
            price: 1,
            conf: 1,
            pub_slot: 1,
        }
        .encode();
        data[4] = 2; // upd_product
        assert!(UpdPriceCommand::decode(&data).is_err());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(UpdPriceCommand::decode(&[0u8; 39]).is_err());
        assert!(UpdPriceCommand::decode(&[0u8; 41]).is_err());
    }

    #[test]
    fn upd_price_references_three_accounts() {
        let command = UpdPriceCommand {
            status: PriceStatus::Trading,
            price: 100,
            conf: 1,
            pub_slot: 10,
        };
        let instruction = upd_price(
            Pubkey::new([0xaa; 32]),
            Pubkey::new([1; 32]),
            Pubkey::new([2; 32]),
            &command,
        );
        assert_eq!(instruction.accounts.len(), 3);
        assert!(instruction.accounts[0].is_signer);
        assert_eq!(instruction.accounts[1].pubkey, Pubkey::new([2; 32]));
        assert_eq!(instruction.accounts[2].pubkey, CLOCK_SYSVAR);
        assert!(!instruction.accounts[2].is_writable);
    }

    #[test]
    fn clock_sysvar_matches_known_address() {
        assert_eq!(
            CLOCK_SYSVAR.to_string(),
            "SysvarC1ock11111111111111111111111111111111"
        );
    }
}
