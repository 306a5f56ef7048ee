//! atlas-compact
//!
//! Compacts, validates and inspects AtlasKV table files.

use std::path::{Path, PathBuf};

use atlas_compaction::compaction::{parse_generation, table_path};
use atlas_compaction::{
    CompactionController, CompactionTask, Config, FragmentSource, Result, TableReader, Validator,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasKV table compaction tool
#[derive(Parser, Debug)]
#[command(name = "atlas-compact")]
#[command(about = "Compact and validate AtlasKV table files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge tables into one new table
    Compact {
        /// Input table files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output table (defaults to the next generation in the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        settings: Settings,
    },

    /// Compute repair digests over tables without writing anything
    Validate {
        /// Input table files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Print every partition digest
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        settings: Settings,
    },

    /// Print a table's statistics and partitions
    Dump {
        /// Table file
        table: PathBuf,

        /// Only print statistics
        #[arg(short, long)]
        stats: bool,
    },
}

/// Compaction settings shared by `compact` and `validate`
#[derive(ClapArgs, Debug)]
struct Settings {
    /// Data directory
    #[arg(short, long, default_value = "./atlaskv_data")]
    data_dir: String,

    /// Rows larger than this (in MB) are compacted incrementally
    #[arg(short = 'm', long, default_value = "64")]
    in_memory_limit_mb: u64,

    /// Column index block size in KB
    #[arg(long, default_value = "64")]
    column_index_kb: u64,

    /// False positive rate of the per-row column bloom filter
    #[arg(long, default_value = "0.01")]
    bloom_fp_rate: f64,

    /// Seconds a tombstone is kept before it may be purged
    #[arg(short, long, default_value = "864000")]
    gc_grace_seconds: u32,

    /// Validation worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,
}

impl Settings {
    fn config(&self) -> Config {
        Config::builder()
            .data_dir(&self.data_dir)
            .in_memory_compaction_limit(self.in_memory_limit_mb.saturating_mul(1024 * 1024))
            .column_index_size(self.column_index_kb.saturating_mul(1024))
            .bloom_fp_rate(self.bloom_fp_rate)
            .gc_grace_seconds(self.gc_grace_seconds)
            .validation_threads(self.threads)
            .build()
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlas_compaction=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("atlas-compact v{}", atlas_compaction::VERSION);

    let result = match args.command {
        Commands::Compact {
            inputs,
            output,
            settings,
        } => compact(&inputs, output, &settings),
        Commands::Validate {
            inputs,
            verbose,
            settings,
        } => validate(&inputs, verbose, &settings),
        Commands::Dump { table, stats } => dump(&table, stats),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn open_all(paths: &[PathBuf]) -> Result<Vec<TableReader>> {
    paths.iter().map(|path| TableReader::open(path)).collect()
}

fn compact(inputs: &[PathBuf], output: Option<PathBuf>, settings: &Settings) -> Result<()> {
    let config = settings.config();
    let controller = CompactionController::new(&config)?;

    let output = match output {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config.data_dir)?;
            next_table_path(&config.data_dir)?
        }
    };

    let mut readers = open_all(inputs)?;
    let stats = CompactionTask::new(&controller).compact(&mut readers, &output)?;

    println!("Wrote {}", output.display());
    println!(
        "  partitions: {} in, {} out, {} dropped, {} merged",
        stats.input_partitions,
        stats.output_partitions,
        stats.dropped_partitions,
        stats.merged_partitions
    );
    println!(
        "  rows: {} lazy, {} cached; {} bytes",
        stats.lazy_rows, stats.cached_rows, stats.bytes_written
    );
    Ok(())
}

fn validate(inputs: &[PathBuf], verbose: bool, settings: &Settings) -> Result<()> {
    let config = settings.config();
    let controller = CompactionController::new(&config)?;

    let mut readers = open_all(inputs)?;
    for reader in &mut readers {
        reader.verify_checksum()?;
    }

    let report = Validator::new(&controller, config.validation_threads).validate(&mut readers)?;

    if verbose {
        for partition in &report.partitions {
            println!("{}  {}", partition.hex(), partition.key);
        }
    }
    println!(
        "root {} ({} partitions, {} empty)",
        report.root_hex(),
        report.partitions.len(),
        report.skipped
    );
    Ok(())
}

fn dump(path: &Path, stats_only: bool) -> Result<()> {
    let mut reader = TableReader::open(path)?;
    reader.verify_checksum()?;

    let stats = reader.stats().clone();
    println!("{}", path.display());
    println!("  partitions:     {}", stats.partition_count);
    println!("  columns:        {}", stats.column_count);
    println!("  row tombstones: {}", stats.row_tombstones);
    println!("  max timestamp:  {:?}", stats.max_timestamp);
    println!("  cached bytes:   {}", stats.cached_bytes);

    if stats_only {
        return Ok(());
    }

    for partition in reader.iter()? {
        let (key, mut fragment) = partition?;
        match fragment.deletion_info() {
            Some(d) => println!(
                "{} [deleted at {}, local {}]",
                key, d.marked_for_delete_at, d.local_deletion_time
            ),
            None => println!("{}", key),
        }

        while let Some(column) = fragment.next_column() {
            let column = column?;
            let name = String::from_utf8_lossy(column.name());
            match column.local_deletion_time() {
                Some(ldt) => println!("  {} @{} <tombstone {}>", name, column.timestamp(), ldt),
                None => println!(
                    "  {} @{} = {}",
                    name,
                    column.timestamp(),
                    String::from_utf8_lossy(column.value())
                ),
            }
        }
    }
    Ok(())
}

/// Path of the generation after the newest table in `dir`
fn next_table_path(dir: &Path) -> Result<PathBuf> {
    let mut newest = 0;
    for entry in std::fs::read_dir(dir)? {
        if let Some(generation) = parse_generation(&entry?.path()) {
            newest = newest.max(generation);
        }
    }
    Ok(table_path(dir, newest + 1))
}
