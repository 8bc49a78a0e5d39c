use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{Classroom, TemplateStore};
use rollcall_hw::{Camera, CameraDevice};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod shell;
mod store;

use config::Config;
use engine::FaceEngine;
use shell::Shell;
use store::SqliteTemplateStore;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance with QR + PIN and face check-in")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive attendance shell (default)
    Shell {
        /// Directory CSV exports are written to
        #[arg(long, default_value = ".")]
        export_dir: PathBuf,
    },
    /// Manage enrolled face templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List students with an enrolled template
    List,
    /// Remove a student's template
    Remove {
        /// Student ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Shell {
        export_dir: PathBuf::from("."),
    }) {
        Commands::Shell { export_dir } => run_shell(config, export_dir).await?,
        Commands::Templates { action } => {
            let store = SqliteTemplateStore::open(&config.db_path)
                .with_context(|| format!("failed to open {}", config.db_path.display()))?;
            match action {
                TemplateAction::List => {
                    let ids = store.list()?;
                    if ids.is_empty() {
                        println!("No faces enrolled");
                    }
                    for id in ids {
                        println!("{id}");
                    }
                }
                TemplateAction::Remove { id } => {
                    if store.remove(&id)? {
                        println!("Removed template for {id}");
                    } else {
                        println!("No template enrolled for {id}");
                    }
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::capture_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_shell(config: Config, export_dir: PathBuf) -> Result<()> {
    let roster = config.roster().context("failed to load roster")?;
    let store = SqliteTemplateStore::open(&config.db_path)
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    tracing::info!(
        students = roster.len(),
        camera = %config.camera_device,
        db = %config.db_path.display(),
        "rollcall starting"
    );

    let classroom = Arc::new(tokio::sync::Mutex::new(Classroom::new(
        roster,
        config.check_in_policy(),
    )));
    let engine = FaceEngine::new(
        classroom.clone(),
        Arc::new(store),
        Arc::new(CameraDevice::new(config.camera_device.clone())),
        config.similarity.clone(),
        config.enroll_width,
    );

    Shell::new(classroom, engine, export_dir).run().await?;
    tracing::info!("rollcall shutting down");
    Ok(())
}
