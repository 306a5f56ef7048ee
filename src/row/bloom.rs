//! Column bloom filter
//!
//! Every row header carries a bloom filter over its column names so readers
//! can skip rows that cannot hold a requested column. The filter uses fixed
//! SipHash keys: two nodes compacting the same row produce the same bytes.

use bloomfilter::Bloom;

use crate::codec::RowRead;
use crate::error::{AtlasError, Result};

const SIP_KEYS: [(u64, u64); 2] = [
    (0x6174_6c61_736b_7630, 0x636f_6c75_6d6e_7330),
    (0x726f_7762_6c6f_6f6d, 0x6669_6c74_6572_7331),
];

/// Upper bound on hash functions regardless of sizing
const MAX_HASHES: u32 = 16;

/// Bloom filter over the column names of one row
pub struct ColumnBloom {
    filter: Bloom<[u8]>,
}

impl ColumnBloom {
    /// Size a filter for `items` names at the given false positive rate
    ///
    /// `fp_rate` must lie strictly between 0 and 1.
    pub fn with_capacity(items: usize, fp_rate: f64) -> Result<Self> {
        if !(fp_rate > 0.0 && fp_rate < 1.0) {
            return Err(AtlasError::Config(format!(
                "bloom_fp_rate must be in (0, 1), got {}",
                fp_rate
            )));
        }

        let items = items.max(1);
        let bitmap_bytes = Bloom::<[u8]>::compute_bitmap_size(items, fp_rate).max(1);
        let bits = bitmap_bytes as u64 * 8;
        let hashes = ((bits as f64 / items as f64) * std::f64::consts::LN_2).ceil() as u32;
        let hashes = hashes.clamp(1, MAX_HASHES);

        Ok(Self {
            filter: Bloom::from_existing(&vec![0u8; bitmap_bytes], bits, hashes, SIP_KEYS),
        })
    }

    pub fn insert(&mut self, name: &[u8]) {
        self.filter.set(name);
    }

    /// False means the row definitely has no such column
    pub fn might_contain(&self, name: &[u8]) -> bool {
        self.filter.check(name)
    }

    pub fn number_of_bits(&self) -> u64 {
        self.filter.number_of_bits()
    }

    pub fn number_of_hash_functions(&self) -> u32 {
        self.filter.number_of_hash_functions()
    }

    /// Encoded size: bits (8) + hashes (4) + bitmap len (4) + bitmap
    pub fn serialized_size(&self) -> u64 {
        16 + self.number_of_bits().div_ceil(8)
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let bitmap = self.filter.bitmap();
        buf.extend_from_slice(&self.number_of_bits().to_be_bytes());
        buf.extend_from_slice(&self.number_of_hash_functions().to_be_bytes());
        buf.extend_from_slice(&(bitmap.len() as u32).to_be_bytes());
        buf.extend_from_slice(&bitmap);
    }

    pub(crate) fn decode<D: RowRead>(decoder: &mut D) -> Result<Self> {
        let (bits, hashes, bitmap_len) = decode_header(decoder)?;
        let bitmap = decoder.take(bitmap_len as usize, "bloom filter bitmap")?;
        Ok(Self {
            filter: Bloom::from_existing(&bitmap, bits, hashes, SIP_KEYS),
        })
    }

    /// Step over an encoded filter without loading its bitmap
    pub(crate) fn skip<D: RowRead>(decoder: &mut D) -> Result<()> {
        let (_, _, bitmap_len) = decode_header(decoder)?;
        decoder.skip(bitmap_len as u64, "bloom filter bitmap")
    }
}

/// Bits, hash count and bitmap length of an encoded filter
fn decode_header<D: RowRead>(decoder: &mut D) -> Result<(u64, u32, u32)> {
    let bits = decoder.get_u64("bloom filter bits")?;
    let hashes = decoder.get_u32("bloom filter hashes")?;
    let bitmap_len = decoder.get_u32("bloom filter length")?;

    if bits.div_ceil(8) != bitmap_len as u64 || hashes == 0 {
        return Err(AtlasError::Corruption(format!(
            "Bloom filter header mismatch: {} bits, {} hashes, {} bytes",
            bits, hashes, bitmap_len
        )));
    }
    Ok((bits, hashes, bitmap_len))
}

impl std::fmt::Debug for ColumnBloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnBloom")
            .field("bits", &self.number_of_bits())
            .field("hashes", &self.number_of_hash_functions())
            .finish()
    }
}
