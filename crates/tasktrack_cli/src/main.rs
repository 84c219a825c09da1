//! Command-line entry point for schema administration.
//!
//! # Responsibility
//! - Create or drop the task tracker tables on Postgres (from `DB_*`
//!   variables) or on a SQLite file.
//! - Provide a linkage probe for the core crate.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasktrack_core::{
    create_tables, default_log_level, drop_tables, init_logging, Backend, PgBackend,
    SqliteBackend,
};

#[derive(Debug, Parser)]
#[command(name = "tasktrack", version, about = "Task tracker schema administration")]
struct Cli {
    /// Use this SQLite database file instead of Postgres.
    #[arg(long, global = true)]
    sqlite: Option<PathBuf>,

    /// Write rolling logs into this absolute directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print core linkage information.
    Ping,
    /// Create `t_news` and `t_tasks`.
    CreateTables,
    /// Drop `t_news` and `t_tasks` if they exist.
    DropTables,
}

#[derive(Debug, Clone, Copy)]
enum SchemaAction {
    Create,
    Drop,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &log_dir.to_string_lossy()).map_err(anyhow::Error::msg)?;
    }

    let action = match cli.command {
        Command::Ping => {
            println!("tasktrack_core ping={}", tasktrack_core::ping());
            println!("tasktrack_core version={}", tasktrack_core::core_version());
            return Ok(());
        }
        Command::CreateTables => SchemaAction::Create,
        Command::DropTables => SchemaAction::Drop,
    };

    match &cli.sqlite {
        Some(path) => run(action, &SqliteBackend::open(path)),
        None => {
            let backend = PgBackend::from_env().context("reading DB_* connection settings")?;
            run(action, &backend)
        }
    }
}

fn run<B: Backend>(action: SchemaAction, backend: &B) -> Result<()> {
    match action {
        SchemaAction::Create => {
            create_tables(backend).context("creating tables")?;
            println!("Tables are created successfully...");
        }
        SchemaAction::Drop => {
            drop_tables(backend).context("dropping tables")?;
            println!("Tables are dropped...");
        }
    }
    Ok(())
}
