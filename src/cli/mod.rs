use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::storage;

pub mod commands;

use self::commands::{ComposeArgs, DeleteArgs, EditArgs, ExportArgs, ListArgs, NewArgs};

#[derive(Parser, Debug)]
#[command(
    name = "draftpad",
    version,
    about = "Draft notes with undo history and autosave"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over DRAFTPAD_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DRAFTPAD_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and save a draft in one go
    New(NewArgs),
    /// List stored drafts with a plain-text preview
    List(ListArgs),
    /// Change the title or content of a stored draft
    Edit(EditArgs),
    /// Delete a stored draft
    Delete(DeleteArgs),
    /// Write a draft's raw content to a file
    Export(ExportArgs),
    /// Edit a draft line by line from stdin, with undo and autosave
    Compose(ComposeArgs),
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::discover_with(cli.config, cli.data_dir)?;
    loader.paths().ensure_directories()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = Arc::new(storage::init(&config.storage)?);
    tracing::debug!(database = %storage.database_path().display(), "storage ready");

    match cli.command {
        Commands::New(args) => commands::new_draft(storage, &config, args).await,
        Commands::List(args) => commands::list_drafts(storage.as_ref(), &config, args).await,
        Commands::Edit(args) => commands::edit_draft(storage, &config, args).await,
        Commands::Delete(args) => commands::delete_draft(storage, &config, args).await,
        Commands::Export(args) => commands::export_draft(storage, &config, args).await,
        Commands::Compose(args) => commands::compose(storage, &config, args).await,
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
