//! Pieces CLI
//!
//! Manage the numbered pieces of a document stored in a local directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pc_core::{AppConfig, CitationStyle, DocumentId, LoggingConfig, Notice, NoticeLevel, Notifier};
use pc_pieces::{
    DocumentEditor, LocalRemoteStore, ManifestFormat, PieceService, SelectedFile, UploadForm,
};

#[derive(Parser)]
#[command(name = "pieces", version, about = "Numbered exhibits attached to a document")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Document whose pieces are managed
    #[arg(long, global = true, env = "PIECES_DOCUMENT", default_value = "default")]
    document: String,

    /// Storage directory (overrides PIECES_STORAGE_PATH)
    #[arg(long, global = true, value_name = "DIR")]
    storage: Option<PathBuf>,

    /// Citation wording: english or french (overrides PIECES_CITATION_STYLE)
    #[arg(long, global = true, value_name = "STYLE")]
    style: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List pieces in order
    List,
    /// Add a file as the next piece
    Add {
        path: PathBuf,
        /// Piece name; defaults to the filename without extension
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Change a piece's name and description
    Rename {
        id: String,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a piece; later pieces are renumbered
    Delete { id: String },
    /// Move a piece immediately before another one
    Move {
        id: String,
        #[arg(long, value_name = "ID")]
        before: String,
    },
    /// Print the citation for a piece
    Cite { id: String },
    /// Print the list of all pieces
    Manifest {
        #[arg(long)]
        html: bool,
    },
    /// Write a piece's content to a directory
    Download {
        id: String,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

/// Inserted text goes to stdout
struct StdoutEditor;

impl DocumentEditor for StdoutEditor {
    fn insert_text(&self, text: &str) {
        println!("{}", text);
    }
}

/// Notices go to stderr, next to the logs
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => eprintln!("error: {}", notice),
            NoticeLevel::Success | NoticeLevel::Info => eprintln!("{}", notice),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before parsing, so clap's env fallbacks see values from .env
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let loaded = AppConfig::from_env();
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    init_tracing(&config.logging);
    if let Err(e) = &loaded {
        warn!("Failed to load config from env: {}, using defaults", e);
    }

    if let Some(storage) = &cli.storage {
        config.storage.local_path = storage.display().to_string();
    }
    if let Some(style) = &cli.style {
        config.pieces.citation_style = style
            .parse::<CitationStyle>()
            .with_context(|| format!("--style {}", style))?;
    }

    let remote = Arc::new(LocalRemoteStore::new(config.storage_root()));
    let service = PieceService::new(
        remote,
        DocumentId::new(cli.document.as_str()),
        config.pieces.clone(),
        Arc::new(ConsoleNotifier),
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        document = %service.document(),
        storage = %config.storage.local_path,
        "Starting pieces"
    );

    service.load().await?;
    run(&service, cli.command).await
}

async fn run(service: &PieceService<LocalRemoteStore>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            let pieces = service.pieces();
            if pieces.is_empty() {
                println!("No pieces");
            }
            for piece in &pieces {
                println!(
                    "{:>3}. {}  [{}]  {}  {}",
                    piece.numero,
                    piece.name,
                    piece.id,
                    piece.original_filename,
                    piece.human_filesize()
                );
                if let Some(description) = piece.description() {
                    println!("     {}", description);
                }
            }
        }
        Command::Add {
            path,
            name,
            description,
        } => {
            let file = SelectedFile::from_path(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let mut form = UploadForm::new();
            form.select_file(file, service.config().max_file_size)?;
            if let Some(name) = name {
                form.name = name;
            }
            form.description = description;

            let piece = service.upload_form(&mut form).await?;
            println!("{}", piece.id);
        }
        Command::Rename {
            id,
            name,
            description,
        } => {
            service
                .rename(&id.as_str().into(), &name, description.as_deref())
                .await?;
        }
        Command::Delete { id } => {
            service.delete(&id.as_str().into()).await?;
        }
        Command::Move { id, before } => {
            service
                .move_before(&id.as_str().into(), &before.as_str().into())
                .await?;
        }
        Command::Cite { id } => {
            service.insert_reference(&StdoutEditor, &id.as_str().into())?;
        }
        Command::Manifest { html } => {
            let format = if html {
                ManifestFormat::Html
            } else {
                ManifestFormat::Text
            };
            service.insert_manifest(&StdoutEditor, format)?;
        }
        Command::Download { id, output } => {
            let path = service.download(&id.as_str().into(), &output).await?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Initialize tracing; logs go to stderr so stdout stays scriptable
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| "info,pc_pieces=debug".into());

    let json = logging.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let pretty = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}
