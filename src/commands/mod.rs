pub mod chat;
pub mod settings;

use crate::client::ConversationClient;
use crate::config::{default_data_dir, AppConfig, ConfigOverrides};
use crate::controller::ChatController;
use crate::db::models::ConversationRecord;
use crate::db::Database;
use crate::documents::DocumentStore;
use crate::llm::gemini::GeminiTransport;
use crate::preview::TextLayerRenderer;
use anyhow::{Context, Result};
use chat::TerminalView;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Terminal width the page preview is fitted to, in PDF points.
const PREVIEW_WIDTH: f32 = 612.0;

#[derive(Parser)]
#[command(name = "pdf-chat")]
#[command(version)]
#[command(about = "Ask questions about your PDF documents", long_about = None)]
pub struct Cli {
    /// Directory holding the conversation database
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Model name, e.g. gemini-2.0-flash-exp
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// API base URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat {
        /// PDF files to upload before the first question
        files: Vec<PathBuf>,

        /// Wait for whole replies instead of streaming them
        #[arg(long)]
        no_stream: bool,
    },
    /// List saved conversations
    List,
    /// Print a conversation as JSON
    Export { id: String },
    /// Load a conversation from a JSON file
    Import { file: PathBuf },
    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show stored settings
    Show,
    /// Store a setting
    Set { key: String, value: String },
    /// Remove a stored setting
    Unset { key: String },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let db = Database::new(&data_dir)
        .with_context(|| format!("failed to open database in {}", data_dir.display()))?;
    tracing::debug!(data_dir = %data_dir.display(), "Database opened");

    let overrides = ConfigOverrides {
        api_key: cli.api_key.clone(),
        base_url: cli.base_url.clone(),
        model: cli.model.clone(),
    };

    match cli.command {
        None => chat(db, &overrides, Vec::new(), false).await,
        Some(Commands::Chat { files, no_stream }) => chat(db, &overrides, files, no_stream).await,
        Some(Commands::List) => {
            for conversation in db.list_conversations()? {
                println!(
                    "{}  {}  ({})",
                    conversation.id, conversation.title, conversation.updated_at
                );
            }
            Ok(())
        }
        Some(Commands::Export { id }) => {
            let record = db
                .load_record(&id)?
                .with_context(|| format!("conversation not found: {}", id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Some(Commands::Import { file }) => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let record: ConversationRecord = serde_json::from_str(&json)?;
            db.save_record(&record)?;
            println!("Imported {} ({} messages)", record.id, record.messages.len());
            Ok(())
        }
        Some(Commands::Config { action }) => {
            match action {
                ConfigAction::Show => {
                    for (key, value) in settings::get_settings(&db)? {
                        println!("{} = {}", key, value);
                    }
                }
                ConfigAction::Set { key, value } => settings::set_setting(&db, &key, &value)?,
                ConfigAction::Unset { key } => {
                    if !settings::delete_setting(&db, &key)? {
                        println!("{} was not set", key);
                    }
                }
            }
            Ok(())
        }
    }
}

async fn chat(
    db: Database,
    overrides: &ConfigOverrides,
    files: Vec<PathBuf>,
    no_stream: bool,
) -> Result<()> {
    let config = AppConfig::resolve(&db, overrides)?;
    tracing::info!(model = %config.gemini.model, "Starting chat");

    let client = ConversationClient::with_config(
        Box::new(GeminiTransport::new(config.gemini)),
        config.generation,
    );
    let mut controller = ChatController::start(
        db,
        DocumentStore::new(),
        client,
        Box::new(TextLayerRenderer),
        TerminalView::new(),
        PREVIEW_WIDTH,
    )?;
    controller.set_streaming(!no_stream);

    if !files.is_empty() {
        for (_, result) in controller.upload(files).await {
            if let Ok(filename) = result {
                println!("* Uploaded {}", filename);
            }
        }
    }

    chat::run_repl(&mut controller).await?;
    Ok(())
}
