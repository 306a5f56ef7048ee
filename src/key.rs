//! Decorated partition keys
//!
//! A partition key decorated with its token. Partitions are ordered by token
//! first, then by raw key bytes, which is the order every table file and every
//! compaction pass walks them in.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

/// Partition key plus the token that places it on the ring
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    token: u64,
    key: Bytes,
}

impl DecoratedKey {
    /// Decorate a raw key with its CRC32 token
    pub fn new(key: impl Into<Bytes>) -> Self {
        let key = key.into();
        let token = crc32fast::hash(&key) as u64;
        Self { token, key }
    }

    /// Decorate a raw key with an explicit token
    pub fn with_token(token: u64, key: impl Into<Bytes>) -> Self {
        Self {
            token,
            key: key.into(),
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Raw key bytes (the stable serialized form)
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecoratedKey({}, {})", self.token, self)
    }
}

impl fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.key) {
            Ok(s) => f.write_str(s),
            Err(_) => f.write_str(&hex::encode(&self.key)),
        }
    }
}
