//! ArborKV CLI
//!
//! Command-line maintenance tool: point reads and writes, collection
//! passes, stats and dumps against a store directory.

use std::path::Path;
use std::process::ExitCode;

use arborkv::{ArborError, Config, Engine, GcError};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// ArborKV CLI
#[derive(Parser, Debug)]
#[command(name = "arborkv-cli")]
#[command(about = "Maintenance CLI for ArborKV stores")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(short, long, default_value = "./arborkv_data")]
    data_dir: String,

    /// Open without taking the writer lock (read-only commands only)
    #[arg(short, long)]
    read_only: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Run one garbage collection pass
    Gc {
        /// Minimum bytes the pass must be able to reclaim
        #[arg(long, default_value = "1")]
        min: u64,

        /// Maximum bytes reclaimed in this pass
        #[arg(long, default_value = "67108864")]
        max: u64,
    },

    /// Print store counters
    Stats,

    /// Print all entries in key order
    Dump {
        /// Only keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Copy a consistent image of the store into another directory
    Backup {
        /// Destination directory (must not already hold a store)
        dest: String,
    },

    /// Find the longest stored key that prefixes the given key
    Prefix {
        /// The key to match
        key: String,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,arborkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .writer_mode(!args.read_only)
        .create_if_missing(!args.read_only)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open store at {}: {}", args.data_dir, e);
            return ExitCode::from(e.code() as u8);
        }
    };

    let result = run(&engine, args.command);
    let close = engine.close();

    match result.and(close) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !e.is_expected() {
                tracing::error!("{}", e);
            }
            ExitCode::from(e.code() as u8)
        }
    }
}

fn run(engine: &Engine, command: Commands) -> arborkv::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => {
                println!("(not found)");
                return Err(ArborError::NotFound);
            }
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Gc { min, max } => match engine.collect(min, max) {
            Ok(report) => println!("{:#?}", report),
            Err(ArborError::Gc(GcError::ThresholdUnreachable { available, min })) => {
                println!("nothing to collect ({} bytes reclaimable, minimum {})", available, min);
            }
            Err(e) => return Err(e),
        },
        Commands::Stats => println!("{:#?}", engine.stats()?),
        Commands::Dump { prefix } => {
            let prefix = prefix.unwrap_or_default();
            let mut count = 0usize;
            for entry in engine.iter_prefix(prefix.as_bytes())? {
                let (key, value) = entry?;
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
                count += 1;
            }
            println!("({} entries)", count);
        }
        Commands::Backup { dest } => {
            engine.backup(Path::new(&dest))?;
            println!("OK");
        }
        Commands::Prefix { key } => match engine.find_longest_prefix(key.as_bytes())? {
            Some((prefix, value)) => println!(
                "{} = {}",
                String::from_utf8_lossy(&prefix),
                String::from_utf8_lossy(&value)
            ),
            None => {
                println!("(no prefix match)");
                return Err(ArborError::NotFound);
            }
        },
    }
    Ok(())
}
