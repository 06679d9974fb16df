//! Unit-Sync command line
//!
//! Routes subcommands to the command layer.
//!
//! ```text
//! unit-sync [--config <path>] <command>
//!     │
//!     ▼
//! commands.rs ──► Vault / Consolidation Engine / Undo / Cortex
//! ```

use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use unit_sync::commands::{self, AppState};
use unit_sync::{Config, SubmitRequest, WriteMode};

#[derive(Parser, Debug)]
#[command(name = "unit-sync", version, about = "Consolidate study notes into one document per unit")]
struct Cli {
    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List subjects
    Subjects,
    /// Create a subject
    NewSubject { name: String },
    /// Rename a subject
    RenameSubject { old: String, new: String },
    /// Delete a subject and all of its units
    DeleteSubject { name: String },
    /// List units that have a document
    Units {
        subject: String,
        /// List units that have a transcript instead
        #[arg(long)]
        readable: bool,
    },
    /// Delete a unit's document and transcript
    DeleteUnit { subject: String, unit: u32 },
    /// Add a note to a unit (reads stdin unless --file is given)
    Submit {
        subject: String,
        unit: u32,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Replace the unit's document instead of appending
        #[arg(long)]
        overwrite: bool,
    },
    /// Restore the previous version of a unit's document
    Undo { subject: String, unit: u32 },
    /// Print a unit's transcript
    Read { subject: String, unit: u32 },
    /// Define a term with the local model
    Define { term: String },
    /// Check whether the local model server is reachable
    CortexStatus,
    /// List models on the local model server
    Models,
}

fn read_note(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read note from {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read note from stdin")?;
            Ok(text)
        }
    }
}

async fn run(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Subjects => {
            for subject in commands::list_subjects(state).map_err(|e| anyhow!(e))? {
                println!("{}", subject);
            }
        }
        Command::NewSubject { name } => {
            let created = commands::create_subject(state, &name).map_err(|e| anyhow!(e))?;
            println!("Created subject {}", created);
        }
        Command::RenameSubject { old, new } => {
            let renamed = commands::rename_subject(state, &old, &new).map_err(|e| anyhow!(e))?;
            println!("Renamed {} to {}", old, renamed);
        }
        Command::DeleteSubject { name } => {
            commands::delete_subject(state, &name).map_err(|e| anyhow!(e))?;
            println!("Deleted subject {}", name);
        }
        Command::Units { subject, readable } => {
            let units = if readable {
                commands::list_readable_units(state, &subject)
            } else {
                commands::list_units(state, &subject)
            }
            .map_err(|e| anyhow!(e))?;
            for u in units {
                println!("Unit {:<3} {:>10}  {}", u.unit, u.size, u.path.display());
            }
        }
        Command::DeleteUnit { subject, unit } => {
            if commands::delete_unit(state, &subject, unit).map_err(|e| anyhow!(e))? {
                println!("Deleted {} Unit {}", subject, unit);
            } else {
                println!("{} Unit {} has no files", subject, unit);
            }
        }
        Command::Submit {
            subject,
            unit,
            file,
            overwrite,
        } => {
            let note_text = read_note(file.as_ref())?;
            let mode = if overwrite {
                WriteMode::Overwrite
            } else {
                WriteMode::Append
            };
            let response = commands::submit_note(state, SubmitRequest::new(subject, unit, note_text, mode))
                .await
                .map_err(|e| anyhow!(e))?;

            println!(
                "{} ({} page(s), {})",
                response.message,
                response.outcome.page_count,
                response.outcome.path.display()
            );
            if let Some(report) = response.sync {
                if report.ok {
                    println!("{}", report.message);
                } else {
                    eprintln!("Warning: {}", report.message);
                }
            }
        }
        Command::Undo { subject, unit } => {
            let outcome = commands::undo_unit(state, &subject, unit).map_err(|e| anyhow!(e))?;
            println!("{}", outcome.message);
        }
        Command::Read { subject, unit } => {
            match commands::read_transcript(state, &subject, unit).map_err(|e| anyhow!(e))? {
                Some(text) => println!("{}", text),
                None => println!("No notes yet for {} Unit {}", subject, unit),
            }
        }
        Command::Define { term } => {
            println!("{}", commands::define_term(state, &term).await.map_err(|e| anyhow!(e))?);
        }
        Command::CortexStatus => {
            println!("{}", commands::check_cortex_status(state).await.map_err(|e| anyhow!(e))?);
        }
        Command::Models => {
            for model in commands::list_models(state).await.map_err(|e| anyhow!(e))? {
                println!("{}", model);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    log::debug!("Data root: {}", config.root_dir.display());

    let state = AppState::new(config);
    run(&state, cli.command).await
}
