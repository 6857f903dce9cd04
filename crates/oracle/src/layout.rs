//! Binary layout of the on-chain oracle accounts (version 2).
//!
//! Every account starts with a 16-byte header: magic, version, account type,
//! and the size of the populated region. Product accounts carry the first
//! price account key plus length-prefixed attribute pairs; price accounts
//! carry the aggregate plus up to 32 per-publisher component slots.

use anyhow::{anyhow, bail, Result};
use pythian_chain::Pubkey;
use std::collections::BTreeMap;

use crate::types::{
    Ema, PriceAccountEntry, PriceComponent, PriceInfo, PriceStatus, PriceType, ProductAccountEntry,
};

pub const MAGIC: u32 = 0xa1b2_c3d4;
pub const VERSION: u32 = 2;

pub const ACCOUNT_TYPE_MAPPING: u32 = 1;
pub const ACCOUNT_TYPE_PRODUCT: u32 = 2;
pub const ACCOUNT_TYPE_PRICE: u32 = 3;

const HEADER_LEN: usize = 16;
const PRICE_COMPONENT_LEN: usize = 96;
const MAX_PRICE_COMPONENTS: usize = 32;

/// Account type of a raw account payload, if the header is well-formed.
pub fn account_type(data: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(data);
    let magic = cursor.read_u32().ok()?;
    let version = cursor.read_u32().ok()?;
    if magic != MAGIC || version != VERSION {
        return None;
    }
    cursor.read_u32().ok()
}

pub fn decode_product(pubkey: Pubkey, data: &[u8]) -> Result<ProductAccountEntry> {
    let mut cursor = Cursor::new(data);
    let size = read_header(&mut cursor, ACCOUNT_TYPE_PRODUCT)?;
    let first_price = cursor.read_pubkey()?;

    let mut attrs = BTreeMap::new();
    let end = size.min(data.len());
    while cursor.offset() < end {
        let key = read_attr_string(&mut cursor, end)?;
        if key.is_empty() {
            break;
        }
        let value = read_attr_string(&mut cursor, end)?;
        attrs.insert(key, value);
    }

    Ok(ProductAccountEntry {
        pubkey,
        first_price,
        attrs,
    })
}

pub fn decode_price(pubkey: Pubkey, data: &[u8]) -> Result<PriceAccountEntry> {
    let mut cursor = Cursor::new(data);
    read_header(&mut cursor, ACCOUNT_TYPE_PRICE)?;

    let price_type = PriceType::from_u32(cursor.read_u32()?);
    let exponent = cursor.read_i32()?;
    let num_components = cursor.read_u32()?;
    let _num_quoters = cursor.read_u32()?;
    let last_slot = cursor.read_u64()?;
    let valid_slot = cursor.read_u64()?;
    let twap = read_ema(&mut cursor)?;
    let twac = read_ema(&mut cursor)?;
    let timestamp = cursor.read_i64()?;
    let min_publishers = cursor.read_u8()?;
    let _drv2 = cursor.read_u8()?;
    let _drv3 = cursor.read_u16()?;
    let _drv4 = cursor.read_u32()?;
    let product = cursor.read_pubkey()?;
    let next = cursor.read_pubkey()?;
    let prev_slot = cursor.read_u64()?;
    let prev_price = cursor.read_i64()?;
    let prev_conf = cursor.read_u64()?;
    let prev_timestamp = cursor.read_i64()?;
    let agg = read_price_info(&mut cursor)?;

    let declared = num_components as usize;
    if declared > MAX_PRICE_COMPONENTS {
        bail!("price account declares {declared} components, limit is {MAX_PRICE_COMPONENTS}");
    }
    let available = cursor.remaining() / PRICE_COMPONENT_LEN;
    let mut components = Vec::with_capacity(declared.min(available));
    for _ in 0..declared.min(available) {
        let publisher = cursor.read_pubkey()?;
        let agg = read_price_info(&mut cursor)?;
        let latest = read_price_info(&mut cursor)?;
        components.push(PriceComponent {
            publisher,
            agg,
            latest,
        });
    }

    Ok(PriceAccountEntry {
        pubkey,
        price_type,
        exponent,
        num_components,
        last_slot,
        valid_slot,
        twap,
        twac,
        timestamp,
        min_publishers,
        product,
        next,
        prev_slot,
        prev_price,
        prev_conf,
        prev_timestamp,
        agg,
        components,
    })
}

fn read_header(cursor: &mut Cursor<'_>, expected_type: u32) -> Result<usize> {
    let magic = cursor.read_u32()?;
    if magic != MAGIC {
        bail!("bad account magic {magic:#010x}");
    }
    let version = cursor.read_u32()?;
    if version != VERSION {
        bail!("unsupported account version {version}");
    }
    let account_type = cursor.read_u32()?;
    if account_type != expected_type {
        bail!("unexpected account type {account_type}, wanted {expected_type}");
    }
    let size = cursor.read_u32()? as usize;
    if size < HEADER_LEN {
        bail!("account size {size} smaller than header");
    }
    Ok(size)
}

fn read_ema(cursor: &mut Cursor<'_>) -> Result<Ema> {
    Ok(Ema {
        val: cursor.read_i64()?,
        numer: cursor.read_i64()?,
        denom: cursor.read_i64()?,
    })
}

fn read_price_info(cursor: &mut Cursor<'_>) -> Result<PriceInfo> {
    Ok(PriceInfo {
        price: cursor.read_i64()?,
        conf: cursor.read_u64()?,
        status: PriceStatus::from_u32(cursor.read_u32()?),
        corp_act: cursor.read_u32()?,
        pub_slot: cursor.read_u64()?,
    })
}

fn read_attr_string(cursor: &mut Cursor<'_>, end: usize) -> Result<String> {
    if cursor.offset() >= end {
        return Ok(String::new());
    }
    let len = cursor.read_u8()? as usize;
    let capped = len.min(end.saturating_sub(cursor.offset()));
    let raw = cursor.take(capped)?;
    Ok(String::from_utf8_lossy(raw).into_owned())
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or_else(|| anyhow!("account read overflows"))?;
        if end > self.data.len() {
            bail!(
                "account truncated: need {end} bytes, have {}",
                self.data.len()
            );
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        let bytes: [u8; 8] = raw.try_into().expect("take returned 8 bytes");
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    fn read_pubkey(&mut self) -> Result<Pubkey> {
        Pubkey::try_from_slice(self.take(32)?)
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    fn push_u32(out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u64(out: &mut Vec<u8>, value: u64) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn push_i64(out: &mut Vec<u8>, value: i64) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn push_price_info(out: &mut Vec<u8>, info: &PriceInfo) {
        push_i64(out, info.price);
        push_u64(out, info.conf);
        push_u32(out, info.status.as_u32());
        push_u32(out, info.corp_act);
        push_u64(out, info.pub_slot);
    }

    pub fn encode_product(entry: &ProductAccountEntry) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(entry.first_price.as_bytes());
        for (key, value) in &entry.attrs {
            body.push(key.len() as u8);
            body.extend_from_slice(key.as_bytes());
            body.push(value.len() as u8);
            body.extend_from_slice(value.as_bytes());
        }

        let mut out = Vec::new();
        push_u32(&mut out, MAGIC);
        push_u32(&mut out, VERSION);
        push_u32(&mut out, ACCOUNT_TYPE_PRODUCT);
        push_u32(&mut out, (HEADER_LEN + body.len()) as u32);
        out.extend_from_slice(&body);
        out
    }

    pub fn encode_price(entry: &PriceAccountEntry) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, MAGIC);
        push_u32(&mut out, VERSION);
        push_u32(&mut out, ACCOUNT_TYPE_PRICE);
        push_u32(&mut out, 0); // size backfilled below
        push_u32(
            &mut out,
            match entry.price_type {
                PriceType::Price => 1,
                PriceType::Unknown => 0,
            },
        );
        push_u32(&mut out, entry.exponent as u32);
        push_u32(&mut out, entry.num_components);
        push_u32(&mut out, 0); // quoter count
        push_u64(&mut out, entry.last_slot);
        push_u64(&mut out, entry.valid_slot);
        for ema in [&entry.twap, &entry.twac] {
            push_i64(&mut out, ema.val);
            push_i64(&mut out, ema.numer);
            push_i64(&mut out, ema.denom);
        }
        push_i64(&mut out, entry.timestamp);
        out.push(entry.min_publishers);
        out.push(0);
        out.extend_from_slice(&0u16.to_le_bytes());
        push_u32(&mut out, 0);
        out.extend_from_slice(entry.product.as_bytes());
        out.extend_from_slice(entry.next.as_bytes());
        push_u64(&mut out, entry.prev_slot);
        push_i64(&mut out, entry.prev_price);
        push_u64(&mut out, entry.prev_conf);
        push_i64(&mut out, entry.prev_timestamp);
        push_price_info(&mut out, &entry.agg);
        for component in &entry.components {
            out.extend_from_slice(component.publisher.as_bytes());
            push_price_info(&mut out, &component.agg);
            push_price_info(&mut out, &component.latest);
        }

        let size = out.len() as u32;
        out[12..16].copy_from_slice(&size.to_le_bytes());
        out
    }
}
