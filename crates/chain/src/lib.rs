//! Solana wire plumbing: key and hash types, the legacy transaction format,
//! and a thin JSON-RPC client for the HTTP endpoint.

mod instruction;
mod rpc;
pub mod shortvec;
mod transaction;
mod types;

pub use self::instruction::{AccountMeta, Instruction};
pub use self::rpc::{classify_request_error, BlockhashSnapshot, Commitment, RpcClient};
pub use self::transaction::{
    CompiledInstruction, Message, MessageHeader, Transaction, TransactionBuilder,
};
pub use self::types::{Blockhash, Pubkey, Signature};
