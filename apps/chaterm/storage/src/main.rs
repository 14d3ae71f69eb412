use anyhow::{Context, Result};
use chaterm_storage_lib::db::seed;
use chaterm_storage_lib::{logging, DatabaseRegistry, StorageConfig, StoreKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chaterm storage maintenance
#[derive(Parser, Debug)]
#[command(name = "chaterm-storage")]
#[command(about = "Inspect and prepare Chaterm per-user databases", long_about = None)]
struct Args {
    /// JSON config file (defaults plus environment overrides otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application data directory, overrides the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the packaged seed databases from the embedded schema
    BuildSeeds {
        #[arg(long)]
        out: PathBuf,
    },
    /// Bootstrap a user's database and print its schema
    Open {
        #[arg(long)]
        user: i64,
        /// Open the terminal-history store instead of the interactive one
        #[arg(long)]
        history: bool,
    },
    /// Print a user's legacy migration status rows as JSON
    Status {
        #[arg(long)]
        user: i64,
    },
}

fn load_config(args: &Args) -> Result<StorageConfig> {
    let mut config = match &args.config {
        Some(path) => StorageConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StorageConfig::from_env()?,
    };
    if let Some(dir) = &args.data_dir {
        config.app_data_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    match &args.command {
        Command::BuildSeeds { out } => {
            for kind in StoreKind::ALL {
                let path = out.join(kind.seed_file_name());
                seed::materialize(kind, &path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("{}", path.display());
            }
        }
        Command::Open { user, history } => {
            let registry = DatabaseRegistry::new(load_config(&args)?);
            let db = if *history {
                registry.acquire_history_database(Some(*user)).await?
            } else {
                registry.acquire_interactive_database(Some(*user)).await?
            };

            println!("{}", db.path().display());
            let conn = db.connection()?;
            for table in seed::schema_objects(&conn, "table")? {
                println!("  {}", table.name);
            }
        }
        Command::Status { user } => {
            let registry = DatabaseRegistry::new(load_config(&args)?);
            let statuses = registry.get_all_migration_statuses(Some(*user)).await?;
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
    }

    Ok(())
}
