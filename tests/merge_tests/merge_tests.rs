//! Tests for the row merge engine
//!
//! These tests verify:
//! - Last-write-wins column reconciliation and its tie breaks
//! - Row deletion marker selection and shadowing
//! - Tombstone purging through the purge predicate
//! - K-way merge order across fragments
//! - Error propagation from fragment sources

use std::io;

use atlas_compaction::merge::{GcGracePurger, MergeStats, RetainAll, RowMerger, TombstonePurger};
use atlas_compaction::{AtlasError, Column, DecoratedKey, DeletionInfo, FragmentSource, MemoryFragment};

// =============================================================================
// Helper Functions
// =============================================================================

fn fragment(deletion: Option<DeletionInfo>, columns: Vec<Column>) -> Box<dyn FragmentSource> {
    Box::new(MemoryFragment::new(deletion, columns))
}

/// Merge the sources and collect surviving columns plus merge counters
fn merge(
    key: &DecoratedKey,
    mut sources: Vec<Box<dyn FragmentSource>>,
    purger: &dyn TombstonePurger,
) -> (Vec<Column>, MergeStats, Option<DeletionInfo>) {
    let merger = RowMerger::new(key, &sources, purger);
    let mut merged = merger.columns(&mut sources).unwrap();
    let columns = merged.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
    let stats = *merged.stats();
    (columns, stats, merger.retained_deletion())
}

fn names(columns: &[Column]) -> Vec<&[u8]> {
    columns.iter().map(|c| c.name()).collect()
}

/// Yields columns exactly as given, without sorting
struct UnsortedFragment {
    columns: Vec<Column>,
    position: usize,
}

impl FragmentSource for UnsortedFragment {
    fn deletion_info(&self) -> Option<DeletionInfo> {
        None
    }

    fn next_column(&mut self) -> Option<atlas_compaction::Result<Column>> {
        let column = self.columns.get(self.position)?.clone();
        self.position += 1;
        Some(Ok(column))
    }

    fn rewind(&mut self) -> atlas_compaction::Result<()> {
        self.position = 0;
        Ok(())
    }

    fn serialized_size(&self) -> u64 {
        0
    }
}

/// Yields one column, then a read error
struct FailingFragment {
    yielded: bool,
}

impl FragmentSource for FailingFragment {
    fn deletion_info(&self) -> Option<DeletionInfo> {
        None
    }

    fn next_column(&mut self) -> Option<atlas_compaction::Result<Column>> {
        if self.yielded {
            return Some(Err(AtlasError::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk read failed",
            ))));
        }
        self.yielded = true;
        Some(Ok(Column::live("a", "1", 1)))
    }

    fn rewind(&mut self) -> atlas_compaction::Result<()> {
        self.yielded = false;
        Ok(())
    }

    fn serialized_size(&self) -> u64 {
        0
    }
}

// =============================================================================
// Column Reconciliation Tests
// =============================================================================

#[test]
fn test_reconcile_higher_timestamp_wins() {
    let old = Column::live("a", "old", 5);
    let new = Column::live("a", "new", 10);

    assert_eq!(old.clone().reconcile(new.clone()), new);
    assert_eq!(new.clone().reconcile(old), new);
}

#[test]
fn test_reconcile_tombstone_beats_live_on_tie() {
    let live = Column::live("a", "value", 7);
    let tombstone = Column::deleted("a", 7, 100);

    assert_eq!(live.clone().reconcile(tombstone.clone()), tombstone);
    assert_eq!(tombstone.clone().reconcile(live), tombstone);
}

#[test]
fn test_reconcile_live_tie_prefers_larger_then_greater_value() {
    let short = Column::live("a", "zz", 7);
    let long = Column::live("a", "aaa", 7);
    assert_eq!(short.clone().reconcile(long.clone()), long);
    assert_eq!(long.clone().reconcile(short), long);

    let low = Column::live("a", "abc", 7);
    let high = Column::live("a", "abd", 7);
    assert_eq!(low.clone().reconcile(high.clone()), high);
    assert_eq!(high.clone().reconcile(low), high);
}

#[test]
fn test_reconcile_tombstone_tie_prefers_later_deletion_time() {
    let early = Column::deleted("a", 7, 100);
    let late = Column::deleted("a", 7, 200);

    assert_eq!(early.clone().reconcile(late.clone()), late);
    assert_eq!(late.clone().reconcile(early), late);
}

// =============================================================================
// Deletion Marker Tests
// =============================================================================

#[test]
fn test_deletion_merge_picks_latest_marker() {
    let older = DeletionInfo::new(100, 1_000);
    let newer = DeletionInfo::new(200, 500);

    assert_eq!(older.merge(newer), newer);
    assert_eq!(newer.merge(older), newer);
}

#[test]
fn test_deletion_shadows_at_or_below_marker() {
    let marker = DeletionInfo::new(100, 1_000);

    assert!(marker.shadows(&Column::live("a", "v", 50)));
    assert!(marker.shadows(&Column::live("a", "v", 100)));
    assert!(!marker.shadows(&Column::live("a", "v", 101)));
}

#[test]
fn test_merger_selects_max_row_marker() {
    let key = DecoratedKey::new("k");
    let sources = vec![
        fragment(Some(DeletionInfo::new(10, 1_000)), vec![]),
        fragment(Some(DeletionInfo::new(20, 900)), vec![]),
    ];

    let (columns, _, deletion) = merge(&key, sources, &RetainAll);
    assert!(columns.is_empty());
    assert_eq!(deletion, Some(DeletionInfo::new(20, 900)));
}

// =============================================================================
// K-way Merge Tests
// =============================================================================

#[test]
fn test_merge_overlapping_fragments() {
    let key = DecoratedKey::new("k");
    let sources = vec![
        fragment(None, vec![Column::live("a", "1", 5), Column::live("b", "2", 3)]),
        fragment(None, vec![Column::live("a", "9", 10), Column::live("c", "3", 7)]),
    ];

    let (columns, stats, deletion) = merge(&key, sources, &RetainAll);

    assert_eq!(
        columns,
        vec![
            Column::live("a", "9", 10),
            Column::live("b", "2", 3),
            Column::live("c", "3", 7),
        ]
    );
    assert_eq!(deletion, None);
    assert_eq!(stats.columns_read, 4);
    assert_eq!(stats.columns_superseded, 1);
    assert_eq!(stats.columns_shadowed, 0);
}

#[test]
fn test_merge_many_fragments_same_column() {
    let key = DecoratedKey::new("k");
    let sources = (0..5)
        .map(|i| fragment(None, vec![Column::live("x", format!("v{}", i), i)]))
        .collect();

    let (columns, stats, _) = merge(&key, sources, &RetainAll);

    assert_eq!(columns, vec![Column::live("x", "v4", 4)]);
    assert_eq!(stats.columns_superseded, 4);
}

#[test]
fn test_merge_output_is_name_ordered() {
    let key = DecoratedKey::new("k");
    let sources = vec![
        fragment(None, vec![Column::live("d", "", 1), Column::live("a", "", 1)]),
        fragment(None, vec![Column::live("c", "", 1)]),
        fragment(None, vec![Column::live("b", "", 1), Column::live("e", "", 1)]),
    ];

    let (columns, _, _) = merge(&key, sources, &RetainAll);
    assert_eq!(
        names(&columns),
        vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..], &b"e"[..]]
    );
}

#[test]
fn test_merge_no_fragments() {
    let key = DecoratedKey::new("k");
    let (columns, stats, deletion) = merge(&key, Vec::new(), &RetainAll);

    assert!(columns.is_empty());
    assert_eq!(stats, MergeStats::default());
    assert_eq!(deletion, None);
}

// =============================================================================
// Shadowing and Purging Tests
// =============================================================================

#[test]
fn test_row_marker_shadows_older_columns() {
    let key = DecoratedKey::new("k");
    let sources = vec![
        fragment(Some(DeletionInfo::new(100, 1_000)), vec![]),
        fragment(None, vec![Column::live("a", "x", 50), Column::live("b", "y", 200)]),
    ];

    let (columns, stats, deletion) = merge(&key, sources, &RetainAll);

    assert_eq!(columns, vec![Column::live("b", "y", 200)]);
    assert_eq!(stats.columns_shadowed, 1);
    assert_eq!(deletion, Some(DeletionInfo::new(100, 1_000)));
}

#[test]
fn test_purged_row_marker_still_shadows() {
    let key = DecoratedKey::new("k");
    let sources = vec![
        fragment(Some(DeletionInfo::new(100, 1_000)), vec![]),
        fragment(None, vec![Column::live("a", "x", 50), Column::live("b", "y", 200)]),
    ];
    let purger = GcGracePurger::new(2_000);

    let merger = RowMerger::new(&key, &sources, &purger);
    assert_eq!(merger.shadowing_deletion(), Some(DeletionInfo::new(100, 1_000)));
    assert_eq!(merger.retained_deletion(), None);

    let (columns, _, deletion) = merge(&key, sources, &purger);
    assert_eq!(columns, vec![Column::live("b", "y", 200)]);
    assert_eq!(deletion, None);
}

#[test]
fn test_expired_column_tombstone_is_purged() {
    let key = DecoratedKey::new("k");
    let sources = vec![fragment(
        None,
        vec![Column::deleted("a", 10, 500), Column::deleted("b", 10, 5_000)],
    )];

    let (columns, stats, _) = merge(&key, sources, &GcGracePurger::new(1_000));

    assert_eq!(columns, vec![Column::deleted("b", 10, 5_000)]);
    assert_eq!(stats.tombstones_purged, 1);
}

#[test]
fn test_tombstone_kept_when_retaining() {
    let key = DecoratedKey::new("k");
    let sources = vec![
        fragment(None, vec![Column::live("a", "x", 5)]),
        fragment(None, vec![Column::deleted("a", 10, 500)]),
    ];

    let (columns, stats, _) = merge(&key, sources, &RetainAll);

    assert_eq!(columns, vec![Column::deleted("a", 10, 500)]);
    assert_eq!(stats.tombstones_purged, 0);
}

#[test]
fn test_gc_grace_purger_boundary() {
    let key = DecoratedKey::new("k");
    let purger = GcGracePurger::new(1_000);

    assert!(purger.is_purgeable(&key, 999));
    assert!(!purger.is_purgeable(&key, 1_000));
    assert!(!RetainAll.is_purgeable(&key, 0));
}

#[test]
fn test_gc_grace_purger_from_grace_seconds() {
    let purger = GcGracePurger::from_grace_seconds(60);
    let now = atlas_compaction::merge::now_in_seconds();

    assert!(purger.gc_before() <= now - 60);
    assert!(purger.gc_before() + 120 > now - 60);
}

// =============================================================================
// Memory Fragment Tests
// =============================================================================

#[test]
fn test_memory_fragment_sorts_and_dedups() {
    let fragment = MemoryFragment::from_columns(vec![
        Column::live("b", "1", 1),
        Column::live("a", "1", 1),
        Column::live("b", "2", 2),
    ]);

    assert_eq!(
        fragment.columns(),
        &[Column::live("a", "1", 1), Column::live("b", "2", 2)]
    );
}

#[test]
fn test_memory_fragment_rewind() {
    let mut fragment = MemoryFragment::from_columns(vec![Column::live("a", "1", 1)]);

    assert!(fragment.next_column().is_some());
    assert!(fragment.next_column().is_none());
    fragment.rewind().unwrap();
    assert!(fragment.next_column().is_some());
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_out_of_order_source_is_corruption() {
    let key = DecoratedKey::new("k");
    let mut sources: Vec<Box<dyn FragmentSource>> = vec![Box::new(UnsortedFragment {
        columns: vec![Column::live("b", "", 1), Column::live("a", "", 1)],
        position: 0,
    })];

    let merger = RowMerger::new(&key, &sources, &RetainAll);
    let result = merger
        .columns(&mut sources)
        .unwrap()
        .collect::<Result<Vec<_>, _>>();

    assert!(matches!(result, Err(AtlasError::Corruption(_))));
}

#[test]
fn test_source_read_error_ends_merge() {
    let key = DecoratedKey::new("k");
    let mut sources: Vec<Box<dyn FragmentSource>> =
        vec![Box::new(FailingFragment { yielded: false })];

    let merger = RowMerger::new(&key, &sources, &RetainAll);
    let mut merged = merger.columns(&mut sources).unwrap();

    assert!(matches!(merged.next(), Some(Err(AtlasError::Io(_)))));
    assert!(merged.next().is_none());
}
