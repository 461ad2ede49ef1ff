//! # CLI - DeltaChain Interactive Shell
//!
//! A REPL-style command-line interface over an in-memory DeltaChain store.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Logs go to stderr, so piping commands through stdin
//! gives clean output for scripted testing.
//!
//! ## Commands
//!
//! ```text
//! INSERT group value   Append a new version of `group`
//! GET group seq        Print version `seq` of `group` (or "(nil)")
//! LATEST group         Print the highest sequence of `group`
//! HISTORY group        List every stored sequence of `group`
//! LOAD path            Insert one "group value" line per row, in one transaction
//! TRUNCATE             Remove every row and drop the table's cache entries
//! STATS                Print cache, staging and encoder counters
//! EXIT / QUIT          Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! ```text
//! DELTACHAIN_DEPTH               diff bases tried per version  (default: 3)
//! DELTACHAIN_KEYFRAME_EVERY      forced keyframe interval      (default: 0 = never)
//! DELTACHAIN_EXTRA_PASS          codec extra pass              (default: false)
//! DELTACHAIN_SEQ_CACHE_MB        sequence cache budget         (default: 4)
//! DELTACHAIN_LOCATION_CACHE_MB   location index budget         (default: 8)
//! DELTACHAIN_CONTENT_CACHE_MB    content cache budget          (default: 64)
//! DELTACHAIN_CONTENT_MAX_ENTRY   largest cached value in bytes (default: 1 MiB)
//! DELTACHAIN_STAGING_SLOTS       staging-buffer slots          (default: 1024)
//! DELTACHAIN_ENCODE_THREADS      encode workers, 0 = inline    (default: 4)
//! RUST_LOG                       log filter                    (default: "warn")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! DeltaChain started (depth=3, keyframe_every=0, encode_threads=4)
//! > INSERT doc hello world
//! OK seq=1 keyframe (11B -> 27B)
//! > INSERT doc hello world, hello again
//! OK seq=2 keyframe (24B -> 40B)
//! > GET doc 1
//! hello world
//! > EXIT
//! bye
//! ```
mod shell;

use std::io::{self, BufWriter};

use anyhow::Result;
use config::{CacheConfig, DeltaConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::shell::Shell;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let delta = DeltaConfig::from_env()?;
    let cache = CacheConfig::from_env()?;
    info!(?delta, ?cache, "configuration loaded");

    println!(
        "DeltaChain started (depth={}, keyframe_every={}, encode_threads={})",
        delta.depth, delta.keyframe_every, cache.num_encode_threads
    );
    println!("Commands: INSERT group value | GET group seq | LATEST group | HISTORY group");
    println!("          LOAD path | TRUNCATE | STATS | EXIT");

    let shell = Shell::new(cache, delta)?;
    let stdin = io::stdin();
    let mut out = BufWriter::new(io::stdout().lock());
    shell.run(stdin.lock(), &mut out)
}
