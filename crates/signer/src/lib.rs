//! Publisher key management: loads the keypair file, enforces the signing
//! policy, and produces transaction signatures. The secret never leaves this
//! crate; signing happens through a callback that hands back signatures, and
//! the key material is zeroed when the signer is dropped.

use anyhow::{bail, Context, Result};
use ed25519_dalek::{Signer as _, SigningKey};
use pythian_chain::{Pubkey, Signature, Transaction};
use std::fs;
use std::path::Path;
use zeroize::Zeroize;

/// Signs oracle publish transactions with the long-lived publisher key.
///
/// The signing policy is a program-level whitelist: every instruction in a
/// transaction must target the configured oracle program, whether or not it
/// requires this key's signature. The underlying key zeroizes on drop.
pub struct Signer {
    key: SigningKey,
    pubkey: Pubkey,
    oracle_program: Pubkey,
}

impl Signer {
    /// Loads an unencrypted keypair file: a JSON array of 64 bytes, secret
    /// seed followed by the public key.
    pub fn load(key_path: impl AsRef<Path>, oracle_program: Pubkey) -> Result<Self> {
        let key_path = key_path.as_ref();
        let raw = fs::read_to_string(key_path)
            .with_context(|| format!("failed to read key file: {}", key_path.display()))?;
        let mut bytes: Vec<u8> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse key file: {}", key_path.display()))?;
        let signer = Self::from_keypair_bytes(&bytes, oracle_program);
        bytes.zeroize();
        signer
    }

    /// Builds a signer from the 64-byte secret-then-public keypair encoding.
    pub fn from_keypair_bytes(bytes: &[u8], oracle_program: Pubkey) -> Result<Self> {
        if bytes.len() != 64 {
            bail!("keypair must be 64 bytes (secret || public), got {}", bytes.len());
        }
        let mut seed: [u8; 32] = bytes[..32].try_into().expect("32-byte seed");
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        let pubkey = Pubkey::new(key.verifying_key().to_bytes());
        let declared = Pubkey::try_from_slice(&bytes[32..])?;
        if pubkey != declared {
            bail!("keypair public half {declared} does not match secret-derived key {pubkey}");
        }
        Ok(Self {
            key,
            pubkey,
            oracle_program,
        })
    }

    /// Deterministic signer for mock mode and tests; never point this at real
    /// funds.
    pub fn from_seed(seed: [u8; 32], oracle_program: Pubkey) -> Self {
        let key = SigningKey::from_bytes(&seed);
        let pubkey = Pubkey::new(key.verifying_key().to_bytes());
        Self {
            key,
            pubkey,
            oracle_program,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    /// Validates and signs a price-update transaction.
    ///
    /// Every instruction's program id is resolved through the account table
    /// and checked against the oracle program before any signature is
    /// produced; a rejected transaction is never partially signed.
    pub fn sign_price_update(&self, transaction: &mut Transaction) -> Result<()> {
        for instruction in &transaction.message.instructions {
            let requested_program = transaction.message.program_id(instruction)?;
            if requested_program != self.oracle_program {
                bail!("refusing to sign for program {requested_program}");
            }
        }

        transaction.sign_with(|pubkey, message| {
            if *pubkey == self.pubkey {
                Some(Signature::new(self.key.sign(message).to_bytes()))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;
    use pythian_chain::{AccountMeta, Blockhash, Instruction, TransactionBuilder};

    fn oracle_program() -> Pubkey {
        Pubkey::new([0xaa; 32])
    }

    fn test_signer() -> Signer {
        Signer::from_seed([42u8; 32], oracle_program())
    }

    fn update_like_instruction(program: Pubkey, publisher: Pubkey) -> Instruction {
        Instruction::new(
            program,
            vec![
                AccountMeta::writable(publisher, true),
                AccountMeta::writable(Pubkey::new([2; 32]), false),
                AccountMeta::readonly(Pubkey::new([3; 32]), false),
            ],
            vec![9, 9, 9],
        )
    }

    fn build_transaction(signer: &Signer, programs: &[Pubkey]) -> Transaction {
        let mut builder = TransactionBuilder::new();
        for program in programs {
            builder.add_instruction(update_like_instruction(*program, signer.pubkey()));
        }
        builder
            .set_fee_payer(signer.pubkey())
            .set_recent_blockhash(Blockhash::new([7; 32]));
        builder.build().expect("build transaction")
    }

    #[test]
    fn signs_whitelisted_transaction() {
        let signer = test_signer();
        let mut tx = build_transaction(&signer, &[oracle_program()]);
        signer.sign_price_update(&mut tx).expect("sign");
        assert_eq!(tx.signatures.len(), 1);

        let verifying = SigningKey::from_bytes(&[42u8; 32]).verifying_key();
        let signature = ed25519_dalek::Signature::from_bytes(&tx.signatures[0].to_bytes());
        verifying
            .verify(&tx.message.serialize(), &signature)
            .expect("signature verifies");
    }

    #[test]
    fn refuses_foreign_program_without_mutating() {
        let signer = test_signer();
        let foreign = Pubkey::new([0xbb; 32]);
        let mut tx = build_transaction(&signer, &[foreign]);
        let error = signer.sign_price_update(&mut tx).expect_err("must refuse");
        assert_eq!(
            error.to_string(),
            format!("refusing to sign for program {foreign}")
        );
        assert!(tx.signatures.is_empty());
    }

    #[test]
    fn refuses_mixed_transaction_entirely() {
        let signer = test_signer();
        let foreign = Pubkey::new([0xbb; 32]);
        let mut tx = build_transaction(&signer, &[oracle_program(), foreign]);
        assert!(signer.sign_price_update(&mut tx).is_err());
        assert!(tx.signatures.is_empty());
    }

    #[test]
    fn keypair_bytes_round_trip() {
        let reference = SigningKey::from_bytes(&[9u8; 32]);
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&[9u8; 32]);
        bytes.extend_from_slice(&reference.verifying_key().to_bytes());

        let signer = Signer::from_keypair_bytes(&bytes, oracle_program()).expect("load");
        assert_eq!(
            signer.pubkey(),
            Pubkey::new(reference.verifying_key().to_bytes())
        );
    }

    #[test]
    fn keypair_bytes_reject_mismatched_public_half() {
        let mut bytes = vec![9u8; 64];
        bytes[40] ^= 0xff;
        assert!(Signer::from_keypair_bytes(&bytes, oracle_program()).is_err());
    }

    #[test]
    fn keypair_bytes_reject_wrong_length() {
        assert!(Signer::from_keypair_bytes(&[1u8; 32], oracle_program()).is_err());
    }

    #[test]
    fn key_file_loads_json_array() {
        let reference = SigningKey::from_bytes(&[5u8; 32]);
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&[5u8; 32]);
        bytes.extend_from_slice(&reference.verifying_key().to_bytes());
        let encoded = serde_json::to_string(&bytes).expect("encode");

        let path = std::env::temp_dir().join(format!(
            "pythian-signer-test-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, encoded).expect("write key file");
        let signer = Signer::load(&path, oracle_program()).expect("load key file");
        let _ = std::fs::remove_file(&path);
        assert_eq!(
            signer.pubkey(),
            Pubkey::new(reference.verifying_key().to_bytes())
        );
    }
}
