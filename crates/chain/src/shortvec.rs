//! Compact-u16 length prefix used throughout the legacy transaction format.

use anyhow::{anyhow, Result};

pub fn encode_len(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return;
        }
    }
}

/// Decodes a shortvec length prefix, returning the value and the number of
/// prefix bytes consumed.
pub fn decode_len(bytes: &[u8]) -> Result<(usize, usize)> {
    if bytes.is_empty() {
        return Err(anyhow!("shortvec is empty"));
    }
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (index, byte) in bytes.iter().copied().enumerate() {
        let part = u64::from(byte & 0x7f);
        let shifted = part
            .checked_shl(shift)
            .ok_or_else(|| anyhow!("shortvec shift overflow"))?;
        value = value
            .checked_add(shifted)
            .ok_or_else(|| anyhow!("shortvec value overflow"))?;
        if byte & 0x80 == 0 {
            let parsed = usize::try_from(value).map_err(|_| anyhow!("shortvec exceeds usize"))?;
            return Ok((parsed, index + 1));
        }
        shift = shift
            .checked_add(7)
            .ok_or_else(|| anyhow!("shortvec shift overflow"))?;
        if shift >= 64 {
            return Err(anyhow!("shortvec uses too many bytes"));
        }
    }
    Err(anyhow!("shortvec is truncated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for len in [0usize, 1, 5, 0x7f, 0x80, 0x3fff, 0x4000, 0xffff] {
            let mut out = Vec::new();
            encode_len(&mut out, len);
            let (decoded, consumed) = decode_len(&out).expect("decode");
            assert_eq!(decoded, len);
            assert_eq!(consumed, out.len());
        }
    }

    #[test]
    fn single_byte_lengths() {
        let mut out = Vec::new();
        encode_len(&mut out, 3);
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn two_byte_length() {
        let mut out = Vec::new();
        encode_len(&mut out, 0x80);
        assert_eq!(out, vec![0x80, 0x01]);
    }

    #[test]
    fn truncated_prefix_is_rejected() {
        assert!(decode_len(&[0x80]).is_err());
        assert!(decode_len(&[]).is_err());
    }
}
