//! strata-migrate CLI
//!
//! Command-line tool for managing migration files and database state.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use strata_core::connection::Connection;
use strata_core::sqlite::SqliteDriver;
use strata_migrate::manager::MigrationManager;
use strata_migrate::writer::{discover_versions, generate_version, MigrationWriter};

/// Timestamp-versioned database migrations.
#[derive(Parser)]
#[command(name = "strata-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Table prefix substituted for the `#__` token.
    #[arg(short, long, env = "STRATA_PREFIX", default_value = "")]
    prefix: String,

    /// Migrations directory.
    #[arg(short, long, default_value = "migrations")]
    migrations_dir: PathBuf,

    /// Enable verbose output.
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new migration file skeleton.
    Generate,

    /// Show which migration files have been applied.
    Status,

    /// Delete all rows from every table except tracking tables.
    Flush {
        /// Drop every table and view instead of deleting rows.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Generate => {
            let writer = MigrationWriter::new(&cli.migrations_dir);
            let path = writer.write(&generate_version())?;
            info!("Created migration {}", path.display());
        }

        Commands::Status => {
            let conn = connect(&cli).await?;
            let manager = MigrationManager::new(conn);
            let applied = manager.applied_versions().await?;
            let discovered = discover_versions(&cli.migrations_dir)?;

            if discovered.is_empty() {
                info!("No migration files in {}", cli.migrations_dir.display());
            } else {
                println!("\nMigrations in {}:", cli.migrations_dir.display());
                println!("{:-<40}", "");
                for version in &discovered {
                    let mark = if applied.contains(version) { "X" } else { " " };
                    println!(" [{mark}] {version}");
                }
                println!();
            }

            let orphaned: Vec<_> = applied
                .iter()
                .filter(|v| !discovered.contains(v))
                .collect();
            if !orphaned.is_empty() {
                println!("Applied without a matching file:");
                for version in orphaned {
                    println!("     {version}");
                }
                println!();
            }
        }

        Commands::Flush { all } => {
            let conn = connect(&cli).await?;
            let platform = conn.platform()?;
            if all {
                platform.flush_database().await?;
                info!("Dropped all tables and views.");
            } else {
                platform.flush_data().await?;
                info!("Deleted all rows outside tracking tables.");
            }
        }
    }

    Ok(())
}

async fn connect(cli: &Cli) -> anyhow::Result<Connection> {
    let driver = SqliteDriver::connect(&cli.database).await?;
    let conn = Connection::new(Arc::new(driver));
    conn.set_prefix(cli.prefix.clone());
    Ok(conn)
}
