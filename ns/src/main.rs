//! ns - NexusStore maintenance CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use nexusstore::{Database, TABLES};

#[derive(Parser)]
#[command(name = "ns", about = "NexusStore maintenance CLI", version)]
struct Cli {
    /// Path to the database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create (and migrate) the database
    Init,
    /// List the tables in the schema
    Tables,
    /// Print the resolved database path
    Path,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nexus")
        .join("nexus.db")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.db.unwrap_or_else(default_db_path);

    match cli.command {
        Command::Init => {
            Database::open(&path).context("Failed to open database")?;
            println!("Initialized {}", path.display());
        }
        Command::Tables => {
            for table in TABLES {
                println!("{table}");
            }
        }
        Command::Path => {
            println!("{}", path.display());
        }
    }

    Ok(())
}
