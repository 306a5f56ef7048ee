//! Tests for compacted table files
//!
//! These tests verify:
//! - Table creation and writing from compacted rows
//! - Key lookups via the in-memory index
//! - Sequential iteration in key order
//! - Statistics block contents
//! - File-backed fragments for rows above the buffered limit
//! - Format validation (magic, footer, index, entry sizes, checksum)

use std::fs;
use std::path::{Path, PathBuf};

use atlas_compaction::merge::RetainAll;
use atlas_compaction::{
    AtlasError, Column, CompactedRow, DecoratedKey, DeletionInfo, FragmentSource, MemoryFragment,
    PrecompactedRow, RowOptions, TableReader, TableStats, TableWriter,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_table() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("table_000001.atc");
    (temp_dir, path)
}

/// `count` keys in table order
fn sorted_keys(count: usize) -> Vec<DecoratedKey> {
    let mut keys: Vec<DecoratedKey> = (0..count)
        .map(|i| DecoratedKey::new(format!("key{:05}", i)))
        .collect();
    keys.sort();
    keys
}

fn append(
    writer: &mut TableWriter,
    key: &DecoratedKey,
    deletion: Option<DeletionInfo>,
    columns: Vec<Column>,
    cached: bool,
) -> atlas_compaction::Result<u64> {
    let sources: Vec<Box<dyn FragmentSource>> =
        vec![Box::new(MemoryFragment::new(deletion, columns).with_cached(cached))];
    let row = PrecompactedRow::new(key, sources, &RetainAll, &RowOptions::default())?;
    writer.append(&mut CompactedRow::Precompacted(row))
}

/// Write a table where partition `i` holds columns `c0..c{i % 3}`
fn create_table(path: &Path, keys: &[DecoratedKey]) -> TableStats {
    let mut writer = TableWriter::new(path).unwrap();
    for (i, key) in keys.iter().enumerate() {
        let columns = (0..=(i % 3))
            .map(|c| Column::live(format!("c{}", c), format!("{}-{}", key, c), (i * 10 + c) as i64))
            .collect();
        append(&mut writer, key, None, columns, false).unwrap();
    }
    writer.finish().unwrap()
}

fn drain(fragment: &mut dyn FragmentSource) -> Vec<Column> {
    let mut columns = Vec::new();
    while let Some(column) = fragment.next_column() {
        columns.push(column.unwrap());
    }
    columns
}

// =============================================================================
// TableWriter Tests
// =============================================================================

#[test]
fn test_writer_creates_file() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(5);

    let stats = create_table(&path, &keys);

    assert!(path.exists());
    assert_eq!(stats.partition_count, 5);
}

#[test]
fn test_writer_empty_table() {
    let (_temp, path) = setup_temp_table();

    let stats = TableWriter::new(&path).unwrap().finish().unwrap();
    assert_eq!(stats.partition_count, 0);

    let mut reader = TableReader::open(&path).unwrap();
    assert_eq!(reader.partition_count(), 0);
    assert_eq!(reader.iter().unwrap().count(), 0);
    reader.verify_checksum().unwrap();
}

#[test]
fn test_writer_tracks_statistics() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(2);
    let mut writer = TableWriter::new(&path).unwrap();

    append(
        &mut writer,
        &keys[0],
        Some(DeletionInfo::new(1, 1_000)),
        vec![Column::live("a", "x", 5), Column::live("b", "y", 42)],
        false,
    )
    .unwrap();
    append(&mut writer, &keys[1], None, vec![Column::live("a", "z", 7)], false).unwrap();
    assert_eq!(writer.partition_count(), 2);

    let stats = writer.finish().unwrap();
    assert_eq!(stats.partition_count, 2);
    assert_eq!(stats.column_count, 3);
    assert_eq!(stats.row_tombstones, 1);
    assert_eq!(stats.max_timestamp, Some(42));
    assert_eq!(stats.min_key, keys[0].key());
    assert_eq!(stats.max_key, keys[1].key());
    assert_eq!(stats.cached_bytes, 0);

    let reader = TableReader::open(&path).unwrap();
    assert_eq!(reader.stats(), &stats);
}

#[test]
fn test_writer_rejects_unordered_keys() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(2);
    let mut writer = TableWriter::new(&path).unwrap();

    append(&mut writer, &keys[1], None, vec![Column::live("a", "x", 1)], false).unwrap();
    let result = append(&mut writer, &keys[0], None, vec![Column::live("a", "x", 1)], false);
    assert!(matches!(result, Err(AtlasError::Storage(_))));

    let result = append(&mut writer, &keys[1], None, vec![Column::live("a", "x", 1)], false);
    assert!(matches!(result, Err(AtlasError::Storage(_))));
}

#[test]
fn test_writer_records_cached_ranges() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(2);
    let mut writer = TableWriter::new(&path).unwrap();

    append(&mut writer, &keys[0], None, vec![Column::live("a", "x", 1)], true).unwrap();
    append(&mut writer, &keys[1], None, vec![Column::live("a", "x", 1)], false).unwrap();

    let stats = writer.finish().unwrap();
    assert!(stats.cached_bytes > 0);
}

// =============================================================================
// TableReader Tests - Lookups
// =============================================================================

#[test]
fn test_reader_get_existing_key() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(10);
    create_table(&path, &keys);

    let mut reader = TableReader::open(&path).unwrap();
    assert_eq!(reader.partition_count(), 10);

    for (i, key) in keys.iter().enumerate() {
        let mut fragment = reader.get(key).unwrap().unwrap();
        let columns = drain(&mut fragment);
        assert_eq!(columns.len(), i % 3 + 1);
        assert_eq!(columns[0].value(), format!("{}-0", key).as_bytes());
    }
}

#[test]
fn test_reader_get_missing_key() {
    let (_temp, path) = setup_temp_table();
    create_table(&path, &sorted_keys(3));

    let mut reader = TableReader::open(&path).unwrap();
    assert!(reader.get(&DecoratedKey::new("missing")).unwrap().is_none());
}

#[test]
fn test_reader_preserves_explicit_tokens() {
    let (_temp, path) = setup_temp_table();
    let keys = vec![
        DecoratedKey::with_token(1, "zeta"),
        DecoratedKey::with_token(2, "alpha"),
    ];
    create_table(&path, &keys);

    let reader = TableReader::open(&path).unwrap();
    assert_eq!(reader.keys().cloned().collect::<Vec<_>>(), keys);
}

#[test]
fn test_reader_might_contain() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(10);
    create_table(&path, &keys);

    let reader = TableReader::open(&path).unwrap();
    assert!(reader.might_contain(&keys[0]));
    assert!(reader.might_contain(&keys[9]));
    assert!(!reader.might_contain(&DecoratedKey::with_token(u64::MAX, "after")));
}

// =============================================================================
// TableReader Tests - Iteration
// =============================================================================

#[test]
fn test_iterator_yields_partitions_in_order() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(20);
    create_table(&path, &keys);

    let mut reader = TableReader::open(&path).unwrap();
    let seen: Vec<DecoratedKey> = reader
        .iter()
        .unwrap()
        .map(|partition| partition.unwrap().0)
        .collect();

    assert_eq!(seen, keys);
}

#[test]
fn test_iterator_carries_row_markers() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(1);
    let marker = DeletionInfo::new(9, 1_000);
    let mut writer = TableWriter::new(&path).unwrap();
    append(&mut writer, &keys[0], Some(marker), Vec::new(), false).unwrap();
    writer.finish().unwrap();

    let mut reader = TableReader::open(&path).unwrap();
    let (key, fragment) = reader.iter().unwrap().next().unwrap().unwrap();
    assert_eq!(key, keys[0]);
    assert_eq!(fragment.deletion_info(), Some(marker));
    assert_eq!(fragment.column_count(), 0);
}

#[test]
fn test_cached_reader_marks_fragments() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(3);
    create_table(&path, &keys);

    let mut reader = TableReader::open(&path).unwrap();
    reader.set_cached(true);

    for partition in reader.iter().unwrap() {
        assert!(partition.unwrap().1.is_cached());
    }
    assert!(reader.get(&keys[0]).unwrap().unwrap().is_cached());
}

// =============================================================================
// File-backed Fragment Tests
// =============================================================================

#[test]
fn test_large_rows_are_file_backed() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(10);
    create_table(&path, &keys);

    let mut buffered = TableReader::open(&path).unwrap();
    let mut streamed = TableReader::open(&path).unwrap();
    streamed.set_buffered_row_limit(0);

    let from_memory: Vec<_> = buffered.iter().unwrap().map(|p| p.unwrap()).collect();
    let from_file: Vec<_> = streamed.iter().unwrap().map(|p| p.unwrap()).collect();
    assert_eq!(from_file.len(), 10);

    for ((key_a, mut a), (key_b, mut b)) in from_memory.into_iter().zip(from_file) {
        assert_eq!(key_a, key_b);
        assert!(!a.is_file_backed());
        assert!(b.is_file_backed());
        assert_eq!(b.buffered_size(), 0);
        assert_eq!(a.serialized_size(), b.serialized_size());
        assert_eq!(drain(&mut a), drain(&mut b));
    }
}

#[test]
fn test_file_backed_fragment_rewinds() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(3);
    create_table(&path, &keys);

    let mut reader = TableReader::open(&path).unwrap();
    reader.set_buffered_row_limit(0);

    let mut fragment = reader.get(&keys[2]).unwrap().unwrap();
    assert!(fragment.is_file_backed());

    let first = drain(&mut fragment);
    assert_eq!(first.len(), 3);
    fragment.rewind().unwrap();
    assert_eq!(drain(&mut fragment), first);

    // Partial read, then rewind mid-row
    fragment.rewind().unwrap();
    assert_eq!(fragment.next_column().unwrap().unwrap(), first[0]);
    fragment.rewind().unwrap();
    assert_eq!(drain(&mut fragment), first);
}

#[test]
fn test_file_backed_fragment_carries_row_marker() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(1);
    let marker = DeletionInfo::new(9, 1_000);
    let mut writer = TableWriter::new(&path).unwrap();
    append(&mut writer, &keys[0], Some(marker), vec![Column::live("a", "x", 10)], false).unwrap();
    writer.finish().unwrap();

    let mut reader = TableReader::open(&path).unwrap();
    reader.set_buffered_row_limit(0);
    reader.set_cached(true);

    let (_, mut fragment) = reader.iter().unwrap().next().unwrap().unwrap();
    assert!(fragment.is_file_backed());
    assert!(fragment.is_cached());
    assert_eq!(fragment.deletion_info(), Some(marker));
    assert_eq!(drain(&mut fragment), vec![Column::live("a", "x", 10)]);
}

// =============================================================================
// Format Validation Tests
// =============================================================================

#[test]
fn test_verify_checksum_passes() {
    let (_temp, path) = setup_temp_table();
    create_table(&path, &sorted_keys(50));

    let mut reader = TableReader::open(&path).unwrap();
    reader.verify_checksum().unwrap();
}

#[test]
fn test_verify_checksum_detects_corruption() {
    let (_temp, path) = setup_temp_table();
    create_table(&path, &sorted_keys(5));

    let mut data = fs::read(&path).unwrap();
    // Inside the first partition's row bytes
    data[60] ^= 0xff;
    fs::write(&path, &data).unwrap();

    let mut reader = TableReader::open(&path).unwrap();
    assert!(matches!(
        reader.verify_checksum(),
        Err(AtlasError::Corruption(_))
    ));
}

#[test]
fn test_open_rejects_bad_magic() {
    let (_temp, path) = setup_temp_table();
    create_table(&path, &sorted_keys(2));

    let mut data = fs::read(&path).unwrap();
    data[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, &data).unwrap();

    assert!(matches!(
        TableReader::open(&path),
        Err(AtlasError::Corruption(_))
    ));
}

#[test]
fn test_open_rejects_short_file() {
    let (_temp, path) = setup_temp_table();
    fs::write(&path, b"ATCR").unwrap();

    assert!(matches!(
        TableReader::open(&path),
        Err(AtlasError::Corruption(_))
    ));
}

#[test]
fn test_open_rejects_bad_footer_offsets() {
    let (_temp, path) = setup_temp_table();
    create_table(&path, &sorted_keys(2));

    let mut data = fs::read(&path).unwrap();
    let footer = data.len() - 24;
    data[footer..footer + 8].copy_from_slice(&u64::MAX.to_le_bytes());
    fs::write(&path, &data).unwrap();

    assert!(matches!(
        TableReader::open(&path),
        Err(AtlasError::Corruption(_))
    ));
}

#[test]
fn test_oversized_row_size_is_corruption() {
    let (_temp, path) = setup_temp_table();
    let keys = sorted_keys(1);
    create_table(&path, &keys);

    // First entry's row size follows the 14-byte header, token and key length
    let mut data = fs::read(&path).unwrap();
    data[26..34].copy_from_slice(&u64::MAX.to_le_bytes());
    fs::write(&path, &data).unwrap();

    let mut reader = TableReader::open(&path).unwrap();
    let mut partitions = reader.iter().unwrap();
    assert!(matches!(
        partitions.next(),
        Some(Err(AtlasError::Corruption(_)))
    ));
    assert!(partitions.next().is_none());
    drop(partitions);

    assert!(matches!(
        reader.get(&keys[0]),
        Err(AtlasError::Corruption(_))
    ));
}

#[test]
fn test_index_offset_outside_data_block_is_corruption() {
    let (_temp, path) = setup_temp_table();
    create_table(&path, &sorted_keys(2));

    let mut data = fs::read(&path).unwrap();
    let footer = data.len() - 24;
    let index_offset = u64::from_le_bytes(data[footer..footer + 8].try_into().unwrap());

    // First index entry's offset follows its token and key length
    let entry = index_offset as usize + 12;
    for bad in [index_offset + 1, index_offset, 0, u64::MAX] {
        data[entry..entry + 8].copy_from_slice(&bad.to_le_bytes());
        fs::write(&path, &data).unwrap();

        assert!(
            matches!(TableReader::open(&path), Err(AtlasError::Corruption(_))),
            "offset {}",
            bad
        );
    }
}

#[test]
fn test_open_missing_file_is_io_error() {
    let temp = TempDir::new().unwrap();

    assert!(matches!(
        TableReader::open(&temp.path().join("absent.atc")),
        Err(AtlasError::Io(_))
    ));
}
