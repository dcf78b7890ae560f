//! emberdb - inspect and exercise a B+Tree index stored in a database file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emberdb::access::btree::key::IndexKey;
use emberdb::access::{BPlusTree, RowId};
use emberdb::config::{Config, ReplacerKind};
use emberdb::database::Database;
use emberdb::storage::PageId;
use log::info;
use rand::seq::SliceRandom;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

const KEY_SIZE: usize = IndexKey::I64_SIZE;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file
    #[arg(short, long, default_value = "./emberdb.db")]
    db: PathBuf,

    /// Configuration file (toml, yaml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Buffer pool frames, overrides the configuration
    #[arg(long)]
    pool_size: Option<usize>,

    /// Eviction policy (lru or clock), overrides the configuration
    #[arg(long)]
    replacer: Option<ReplacerKind>,

    /// Index to operate on
    #[arg(short, long, default_value_t = 1)]
    index: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a database file with an empty index
    Init,
    #[command(flatten)]
    Index(IndexCommand),
}

/// Commands that run against an existing index.
#[derive(Subcommand, Debug)]
enum IndexCommand {
    /// Insert keys start..start+count, row id (key, 0)
    Load {
        #[arg(short = 'n', long, default_value_t = 1000)]
        count: i64,
        #[arg(long, default_value_t = 0)]
        start: i64,
        /// Insert in random order
        #[arg(long)]
        shuffle: bool,
    },
    /// Look up one key
    Get { key: i64 },
    /// Remove one key
    Remove { key: i64 },
    /// Print entries in key order
    Scan {
        /// First key to print
        #[arg(long)]
        from: Option<i64>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print tree shape and check its invariants
    Stats,
    /// Write the tree in Graphviz dot format
    Dot {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }
    if let Some(replacer) = args.replacer {
        config.replacer = replacer;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    match args.command {
        Command::Init => {
            let db = Database::create(&args.db, &config).context("Failed to create database")?;
            db.create_index(args.index, KEY_SIZE)?;
            db.close()?;
            println!("Created {} with index {}", args.db.display(), args.index);
        }
        Command::Index(command) => {
            let db = Database::open(&args.db, &config).context("Failed to open database")?;
            let mut tree = db.open_index(args.index, KEY_SIZE)?;
            info!(
                "Opened index {} (node capacity {}, {} frames, {:?} replacer)",
                args.index,
                tree.max_size(),
                config.pool_size,
                config.replacer
            );
            run(&mut tree, command)?;
            db.close()?;
        }
    }
    Ok(())
}

fn run(tree: &mut BPlusTree, command: IndexCommand) -> Result<()> {
    match command {
        IndexCommand::Load { count, start, shuffle } => load(tree, start, count, shuffle)?,
        IndexCommand::Get { key } => match tree.get_value(&IndexKey::from_i64(key))? {
            Some(rid) => println!("{} -> {}", key, rid),
            None => println!("{} not found", key),
        },
        IndexCommand::Remove { key } => {
            if tree.remove(&IndexKey::from_i64(key))? {
                println!("Removed {}", key);
            } else {
                println!("{} not found", key);
            }
        }
        IndexCommand::Scan { from, limit } => {
            let iter = match from {
                Some(key) => tree.begin_at(&IndexKey::from_i64(key))?,
                None => tree.begin()?,
            };
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for entry in iter.take(limit.unwrap_or(usize::MAX)) {
                let (key, rid) = entry?;
                writeln!(out, "{}\t{}", IndexKey::to_i64(&key), rid)?;
            }
        }
        IndexCommand::Stats => {
            let stats = tree.stats()?;
            println!("root:           {:?}", stats.root_page_id);
            println!("height:         {}", stats.height);
            println!("internal pages: {}", stats.internal_pages);
            println!("leaf pages:     {}", stats.leaf_pages);
            println!("entries:        {}", stats.entries);
            println!("key size:       {}", stats.key_size);
            println!("node capacity:  {}", stats.max_size);
            tree.validate().context("Tree failed validation")?;
            println!("valid:          yes");
        }
        IndexCommand::Dot { output } => {
            let fmt_key = |key: &[u8]| IndexKey::to_i64(key).to_string();
            match output {
                Some(path) => {
                    let mut out = BufWriter::new(File::create(&path)?);
                    tree.to_graph(&mut out, fmt_key)?;
                    out.flush()?;
                }
                None => tree.to_graph(&mut io::stdout().lock(), fmt_key)?,
            }
        }
    }
    Ok(())
}

fn load(tree: &mut BPlusTree, start: i64, count: i64, shuffle: bool) -> Result<()> {
    let mut keys: Vec<i64> = (start..start + count).collect();
    if shuffle {
        keys.shuffle(&mut rand::thread_rng());
    }

    let mut inserted = 0;
    for &key in &keys {
        if tree.insert(&IndexKey::from_i64(key), RowId::new(PageId(key as u32), 0))? {
            inserted += 1;
        }
    }
    println!(
        "Inserted {} keys, {} already present",
        inserted,
        keys.len() - inserted
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_init_and_index_commands_parse() -> Result<()> {
        let args = Args::try_parse_from(["emberdb", "--db", "x.db", "init"])?;
        assert!(matches!(args.command, Command::Init));

        let args = Args::try_parse_from(["emberdb", "--replacer", "clock", "get", "5"])?;
        assert_eq!(args.replacer, Some(ReplacerKind::Clock));
        assert!(matches!(
            args.command,
            Command::Index(IndexCommand::Get { key: 5 })
        ));

        let args = Args::try_parse_from(["emberdb", "scan", "--from", "10", "-l", "3"])?;
        assert!(matches!(
            args.command,
            Command::Index(IndexCommand::Scan {
                from: Some(10),
                limit: Some(3)
            })
        ));
        Ok(())
    }
}
