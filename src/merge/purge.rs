//! Tombstone purge predicates
//!
//! The merge engine never decides on its own whether a tombstone has outlived
//! its usefulness; it asks a `TombstonePurger`.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::key::DecoratedKey;

/// Decides whether a tombstone may be dropped during compaction
pub trait TombstonePurger: Send + Sync {
    /// Whether a tombstone for `key` applied at `local_deletion_time`
    /// (seconds since epoch) no longer needs to be kept
    fn is_purgeable(&self, key: &DecoratedKey, local_deletion_time: u32) -> bool;
}

/// Purges tombstones older than a grace period
#[derive(Debug, Clone, Copy)]
pub struct GcGracePurger {
    gc_before: u32,
}

impl GcGracePurger {
    /// Purge tombstones applied strictly before `gc_before`
    pub fn new(gc_before: u32) -> Self {
        Self { gc_before }
    }

    /// Purge tombstones older than `grace_seconds` from now
    pub fn from_grace_seconds(grace_seconds: u32) -> Self {
        Self::new(now_in_seconds().saturating_sub(grace_seconds))
    }

    pub fn gc_before(&self) -> u32 {
        self.gc_before
    }
}

impl TombstonePurger for GcGracePurger {
    fn is_purgeable(&self, _key: &DecoratedKey, local_deletion_time: u32) -> bool {
        local_deletion_time < self.gc_before
    }
}

/// Keeps every tombstone
#[derive(Debug, Clone, Copy, Default)]
pub struct RetainAll;

impl TombstonePurger for RetainAll {
    fn is_purgeable(&self, _key: &DecoratedKey, _local_deletion_time: u32) -> bool {
        false
    }
}

/// Current wall clock in seconds since the epoch
pub fn now_in_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}
