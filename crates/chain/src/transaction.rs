use anyhow::{anyhow, bail, Result};

use crate::instruction::Instruction;
use crate::shortvec;
use crate::types::{Blockhash, Pubkey, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// Legacy transaction message: deduplicated account table plus instructions
/// referring into it by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Program id of the given compiled instruction, resolved through the
    /// account table.
    pub fn program_id(&self, instruction: &CompiledInstruction) -> Result<Pubkey> {
        self.account_keys
            .get(instruction.program_id_index as usize)
            .copied()
            .ok_or_else(|| {
                anyhow!(
                    "program id index {} out of range ({} keys)",
                    instruction.program_id_index,
                    self.account_keys.len()
                )
            })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed_accounts);
        out.push(self.header.num_readonly_unsigned_accounts);
        shortvec::encode_len(&mut out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&self.recent_blockhash.to_bytes());
        shortvec::encode_len(&mut out, self.instructions.len());
        for instruction in &self.instructions {
            out.push(instruction.program_id_index);
            shortvec::encode_len(&mut out, instruction.accounts.len());
            out.extend_from_slice(&instruction.accounts);
            shortvec::encode_len(&mut out, instruction.data.len());
            out.extend_from_slice(&instruction.data);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// Wire bytes: shortvec-prefixed signature list followed by the message.
    pub fn serialize(&self) -> Vec<u8> {
        let message = self.message.serialize();
        let mut out = Vec::with_capacity(self.signatures.len() * 64 + message.len() + 4);
        shortvec::encode_len(&mut out, self.signatures.len());
        for signature in &self.signatures {
            out.extend_from_slice(&signature.to_bytes());
        }
        out.extend_from_slice(&message);
        out
    }

    /// Signs the message by callback: `sign_for` is presented with each
    /// required-signer key and the message bytes, and returns the signature or
    /// `None` if it does not hold that key. The signature list is only
    /// replaced once every required signer resolved, so a failed attempt
    /// leaves the transaction untouched.
    pub fn sign_with<F>(&mut self, mut sign_for: F) -> Result<()>
    where
        F: FnMut(&Pubkey, &[u8]) -> Option<Signature>,
    {
        let message_bytes = self.message.serialize();
        let required = self.message.header.num_required_signatures as usize;
        if required > self.message.account_keys.len() {
            bail!(
                "message requires {required} signatures but lists {} keys",
                self.message.account_keys.len()
            );
        }
        let mut signatures = Vec::with_capacity(required);
        for key in &self.message.account_keys[..required] {
            match sign_for(key, &message_bytes) {
                Some(signature) => signatures.push(signature),
                None => bail!("missing signature for {key}"),
            }
        }
        self.signatures = signatures;
        Ok(())
    }
}

/// Accumulates instructions and compiles them into an unsigned transaction.
/// Account keys are deduplicated with privileges merged, ordered fee-payer
/// first, then remaining signers, then writable non-signers, then readonly
/// non-signers.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    instructions: Vec<Instruction>,
    fee_payer: Option<Pubkey>,
    recent_blockhash: Option<Blockhash>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instruction(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    pub fn set_fee_payer(&mut self, fee_payer: Pubkey) -> &mut Self {
        self.fee_payer = Some(fee_payer);
        self
    }

    pub fn set_recent_blockhash(&mut self, blockhash: Blockhash) -> &mut Self {
        self.recent_blockhash = Some(blockhash);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn build(&self) -> Result<Transaction> {
        let fee_payer = self
            .fee_payer
            .ok_or_else(|| anyhow!("transaction is missing a fee payer"))?;
        let recent_blockhash = self
            .recent_blockhash
            .ok_or_else(|| anyhow!("transaction is missing a recent blockhash"))?;
        if self.instructions.is_empty() {
            bail!("transaction has no instructions");
        }

        // Gather every referenced key with merged privileges, preserving
        // first-seen order within each privilege class.
        let mut entries: Vec<(Pubkey, bool, bool)> = vec![(fee_payer, true, true)];
        let upsert = |entries: &mut Vec<(Pubkey, bool, bool)>,
                          key: Pubkey,
                          is_signer: bool,
                          is_writable: bool| {
            if let Some(entry) = entries.iter_mut().find(|entry| entry.0 == key) {
                entry.1 |= is_signer;
                entry.2 |= is_writable;
            } else {
                entries.push((key, is_signer, is_writable));
            }
        };
        for instruction in &self.instructions {
            for account in &instruction.accounts {
                upsert(
                    &mut entries,
                    account.pubkey,
                    account.is_signer,
                    account.is_writable,
                );
            }
            upsert(&mut entries, instruction.program_id, false, false);
        }

        let mut account_keys = Vec::with_capacity(entries.len());
        let push_class = |account_keys: &mut Vec<Pubkey>, signer: bool, writable: bool| {
            for (key, is_signer, is_writable) in &entries {
                if *key == fee_payer {
                    continue;
                }
                if *is_signer == signer && *is_writable == writable {
                    account_keys.push(*key);
                }
            }
        };
        account_keys.push(fee_payer);
        push_class(&mut account_keys, true, true);
        push_class(&mut account_keys, true, false);
        push_class(&mut account_keys, false, true);
        push_class(&mut account_keys, false, false);

        if account_keys.len() > u8::MAX as usize {
            bail!(
                "transaction references {} accounts, exceeding the account table limit",
                account_keys.len()
            );
        }

        let signer_count = entries.iter().filter(|entry| entry.1).count();
        let readonly_signed = entries
            .iter()
            .filter(|entry| entry.1 && !entry.2 && entry.0 != fee_payer)
            .count();
        let readonly_unsigned = entries.iter().filter(|entry| !entry.1 && !entry.2).count();
        let header = MessageHeader {
            num_required_signatures: signer_count as u8,
            num_readonly_signed_accounts: readonly_signed as u8,
            num_readonly_unsigned_accounts: readonly_unsigned as u8,
        };

        let index_of = |key: Pubkey| -> Result<u8> {
            account_keys
                .iter()
                .position(|candidate| *candidate == key)
                .map(|index| index as u8)
                .ok_or_else(|| anyhow!("account {key} missing from compiled key table"))
        };
        let mut instructions = Vec::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            let mut accounts = Vec::with_capacity(instruction.accounts.len());
            for account in &instruction.accounts {
                accounts.push(index_of(account.pubkey)?);
            }
            instructions.push(CompiledInstruction {
                program_id_index: index_of(instruction.program_id)?,
                accounts,
                data: instruction.data.clone(),
            });
        }

        Ok(Transaction {
            signatures: Vec::new(),
            message: Message {
                header,
                account_keys,
                recent_blockhash,
                instructions,
            },
        })
    }
}
