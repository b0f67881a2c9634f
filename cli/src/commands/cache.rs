//! `component-transport cache` commands.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use transport_runtime::DiskBlobCache;

use crate::output;

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Evict least recently used blobs until the cache fits in the given size
    Prune {
        /// Size bound in bytes
        #[arg(long)]
        max_size: u64,
        /// Cache directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List cached blobs
    Ls {
        /// Cache directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

pub async fn execute(args: CacheArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        CacheCommand::Prune { max_size, dir } => {
            let cache = DiskBlobCache::new(&super::cache_dir(dir))?;
            let before = cache.total_size().await?;
            let evicted = cache.prune(max_size).await?;
            let after = cache.total_size().await?;
            println!(
                "Evicted {} blob(s), {} -> {}",
                evicted,
                output::format_bytes(before),
                output::format_bytes(after)
            );
            Ok(())
        }
        CacheCommand::Ls { dir } => {
            let cache = DiskBlobCache::new(&super::cache_dir(dir))?;
            let mut entries = cache.list_entries().await?;
            entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

            let now = chrono::Utc::now().timestamp();
            let mut table = output::new_table(&["DIGEST", "SIZE", "CACHED", "LAST USED"]);
            for entry in &entries {
                table.add_row(vec![
                    entry.digest.clone(),
                    output::format_bytes(entry.size_bytes),
                    output::format_ago(entry.cached_at, now),
                    output::format_ago(entry.last_accessed, now),
                ]);
            }
            println!("{table}");
            Ok(())
        }
    }
}
