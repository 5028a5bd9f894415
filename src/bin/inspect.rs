//! stardb inspection tool
//!
//! Reads a store directory without modifying it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stardb::storage::MasterFile;
use stardb::{BTree, FilePersistenceManager, ObjectId, Store, StoreConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// stardb store inspector
#[derive(Parser, Debug)]
#[command(name = "stardb-inspect")]
#[command(about = "Inspect commit points and B-trees of a stardb store")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List commit points, newest first
    Commits {
        /// Store directory
        dir: PathBuf,
    },

    /// Print the keys of a B-tree with byte-string values
    Dump {
        /// Store directory
        dir: PathBuf,

        /// Object id of the tree
        tree_id: u64,

        /// Commit to read (defaults to the latest)
        #[arg(short, long)]
        commit: Option<u64>,

        /// Also print values (as lossy UTF-8)
        #[arg(short, long)]
        values: bool,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> stardb::Result<()> {
    let pm = FilePersistenceManager::new();
    match command {
        Commands::Commits { dir } => {
            let master = MasterFile::open_read_only(&pm, dir.join(stardb::common::config::MASTER_FILE_NAME))?;
            let header = master.header();
            println!("store {} (set {})", header.store_id, header.store_set_id);
            println!(
                "page size {}, mode {:?}, type {:?}",
                header.page_size, header.persistence_mode, header.store_type
            );
            let recovery = master.recovery();
            if !recovery.is_clean() {
                println!("damage found: {:?}", recovery);
            }
            for point in master.get_commit_points() {
                println!(
                    "{:>8}  {}  offset {:>10}  job {}",
                    point.commit_number,
                    point.timestamp.to_rfc3339(),
                    point.location_offset,
                    point.job_id
                );
            }
        }
        Commands::Dump {
            dir,
            tree_id,
            commit,
            values,
        } => {
            let commit = match commit {
                Some(commit) => commit,
                None => {
                    let master = MasterFile::open_read_only(&pm, dir.join(stardb::common::config::MASTER_FILE_NAME))?;
                    match master.get_latest_commit_point() {
                        Some(point) => point.commit_number,
                        None => {
                            println!("store has no commits");
                            return Ok(());
                        }
                    }
                }
            };

            let store = Store::open_at(&pm, &dir, commit, StoreConfig::default())?;
            let tree: BTree<Vec<u8>> = store.open_btree(ObjectId::new(tree_id))?;
            println!(
                "tree {} at commit {}: {} keys, order {}, height {}",
                tree_id,
                commit,
                tree.len(),
                tree.order(),
                tree.height(store.objects())?
            );
            for (key, value) in tree.entries(store.objects())? {
                if values {
                    println!("{}\t{}", key, String::from_utf8_lossy(&value));
                } else {
                    println!("{}", key);
                }
            }
        }
    }
    Ok(())
}
