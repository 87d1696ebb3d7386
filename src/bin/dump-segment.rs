//! Prints the header and metadata of an index segment file, and optionally
//! its tuples.
//!
//! # Usage
//!
//! ```bash
//! dump-segment /data/spo.seg
//! dump-segment /data/spo.seg --tuples --limit 20
//! RUST_LOG=bptree_engine=trace dump-segment /data/spo.seg --tuples
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use bptree_engine::{IndexSegmentStore, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dump-segment", version, about = "Inspect an index segment file")]
struct Cli {
    /// Segment file to inspect.
    file: PathBuf,

    /// Print key/value tuples in key order.
    #[arg(long)]
    tuples: bool,

    /// Stop after this many tuples.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match dump(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dump-segment: {}: {e}", cli.file.display());
            ExitCode::FAILURE
        }
    }
}

fn dump(cli: &Cli) -> Result<()> {
    let store = IndexSegmentStore::open(&cli.file)?;
    let cp = store.checkpoint();
    let md = store.metadata();

    println!("segment       {}", cp.uuid);
    println!("entries       {}", cp.entry_count);
    println!("height        {}", cp.height);
    println!("leaves        {}", cp.leaf_count);
    println!("nodes         {}", cp.node_count);
    println!("max record    {} bytes", cp.max_record_len);
    println!("file size     {} bytes", cp.file_size);
    println!("root          {}", cp.root);
    println!("first leaf    {}", cp.first_leaf);
    println!("last leaf     {}", cp.last_leaf);
    println!("commit time   {}", cp.commit_time);
    println!("compacting    {}", cp.compacting_merge);
    println!();
    println!("index         {}", md.uuid());
    if let Some(name) = md.name() {
        println!("name          {name}");
    }
    println!("branching     {}", md.branching_factor());
    println!("key format    {}", md.key_format());
    println!("value format  {}", md.value_format());

    let segment = store.load_index_segment()?;
    match segment.bloom_filter()? {
        Some(filter) => println!(
            "bloom filter  {} bits, {} hashes, p={}",
            filter.num_bits(),
            filter.num_hashes(),
            filter.target_rate()
        ),
        None => println!("bloom filter  none"),
    }

    if cli.tuples {
        println!();
        let limit = cli.limit.unwrap_or(usize::MAX);
        for entry in segment.iter().take(limit) {
            let (key, value) = entry?;
            println!(
                "{} => {}",
                md.key_format().render(&key),
                md.value_format().render(&value)
            );
        }
    }
    store.close()
}
