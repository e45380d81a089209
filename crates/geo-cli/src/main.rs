use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use console::Term;
use geo_store::{Bundle, Fact, LocalStore, Message, UNBOUNDED};
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod ui;

use config::{expand_home, load_config};

#[derive(Parser)]
#[command(name = "geo", version, about = "Local-first conversation and preference store")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.geo",
        help = "Config root directory (contains config.yaml, logs/ and the database)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand, about = "Saved conversations")]
    Conversations(ConversationCommands),
    #[command(subcommand, about = "Search history")]
    History(HistoryCommands),
    #[command(subcommand, about = "User preferences")]
    Prefs(PrefCommands),
    #[command(about = "Write every store to a portable JSON bundle")]
    Export {
        #[arg(long, help = "Output file (default: geo-data-export-<ms>.json)")]
        out: Option<PathBuf>,
    },
    #[command(about = "Replay an exported bundle into the local stores")]
    Import {
        #[arg(help = "Bundle file produced by `geo export`")]
        file: PathBuf,
    },
    #[command(about = "Show approximate storage used per store")]
    Usage,
    #[command(about = "Print the anonymous device identifier")]
    Id,
    #[command(about = "Erase all local data")]
    ClearAll {
        #[arg(long, short = 'y', help = "Skip the confirmation prompt")]
        yes: bool,
    },
    #[command(about = "Show or remember the API endpoint")]
    Endpoint {
        #[arg(help = "Endpoint URL to remember")]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConversationCommands {
    #[command(about = "List conversations, most recent first")]
    List {
        #[arg(long, help = "Maximum number of conversations (default from config)")]
        limit: Option<usize>,
        #[arg(long, conflicts_with = "limit", help = "List every conversation")]
        all: bool,
    },
    #[command(about = "Save a conversation from a JSON file with messages and facts")]
    Save {
        #[arg(help = "JSON file: {\"messages\": [...], \"facts\": [...]}")]
        file: PathBuf,
    },
    #[command(about = "Delete every saved conversation")]
    Clear,
}

#[derive(Subcommand)]
enum HistoryCommands {
    #[command(about = "Record a query and its answer")]
    Add { query: String, answer: String },
    #[command(about = "List history entries, most recent first")]
    List {
        #[arg(long, help = "Maximum number of entries (default from config)")]
        limit: Option<usize>,
    },
    #[command(about = "Delete all history entries")]
    Clear,
}

#[derive(Subcommand)]
enum PrefCommands {
    #[command(about = "Set a preference to a JSON value")]
    Set {
        key: String,
        #[arg(help = "JSON value; bare words are stored as strings")]
        value: String,
    },
    #[command(about = "Print one preference")]
    Get { key: String },
    #[command(about = "Print every preference")]
    List,
}

/// Input accepted by `geo conversations save`.
#[derive(Debug, Deserialize)]
struct ConversationFile {
    messages: Vec<Message>,
    #[serde(default)]
    facts: Vec<Fact>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let home = std::env::var_os("HOME").map(PathBuf::from);
    cli.config_root = expand_home(&cli.config_root, home.as_deref());

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "geo.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(&cli.config_root)?;
    let store = LocalStore::new(config.store);
    let term = Term::stdout();

    let outcome = run(&store, &term, command).await;
    store.close().await.context("failed to close local store")?;
    outcome
}

async fn run(store: &LocalStore, term: &Term, command: Commands) -> Result<()> {
    match command {
        Commands::Conversations(cmd) => match cmd {
            ConversationCommands::List { limit, all } => {
                let limit = if all { Some(UNBOUNDED) } else { limit };
                let conversations = store.conversations().list(limit).await?;
                if conversations.is_empty() {
                    ui::print_empty(term, "conversations");
                } else {
                    ui::render_conversations(term, &conversations);
                }
            }
            ConversationCommands::Save { file } => {
                let text = read_file(&file)?;
                let input: ConversationFile = serde_json::from_str(&text)
                    .with_context(|| format!("invalid conversation file {}", file.display()))?;
                let id = store
                    .conversations()
                    .add(input.messages, input.facts)
                    .await?;
                ui::print_done(term, &format!("Conversation saved as {id}"));
            }
            ConversationCommands::Clear => {
                store.conversations().clear().await?;
                ui::print_done(term, "Conversations cleared.");
            }
        },
        Commands::History(cmd) => match cmd {
            HistoryCommands::Add { query, answer } => {
                let id = store.history().add(&query, &answer).await?;
                ui::print_done(term, &format!("History entry {id} recorded."));
            }
            HistoryCommands::List { limit } => {
                let entries = store.history().list(limit).await?;
                if entries.is_empty() {
                    ui::print_empty(term, "history entries");
                } else {
                    ui::render_history(term, &entries);
                }
            }
            HistoryCommands::Clear => {
                store.history().clear().await?;
                ui::print_done(term, "History cleared.");
            }
        },
        Commands::Prefs(cmd) => match cmd {
            PrefCommands::Set { key, value } => {
                store.preferences().set(&key, parse_value(&value)).await?;
                ui::print_done(term, &format!("Preference '{key}' saved."));
            }
            PrefCommands::Get { key } => match store.preferences().get(&key).await? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("preference not set: {key}"),
            },
            PrefCommands::List => {
                let preferences = store.preferences().list_all().await?;
                if preferences.is_empty() {
                    ui::print_empty(term, "preferences");
                }
                for (key, value) in &preferences {
                    println!("{key} = {value}");
                }
            }
        },
        Commands::Export { out } => {
            let bundle = store.export_bundle().await?;
            let path = out.unwrap_or_else(|| {
                PathBuf::from(Bundle::file_name(chrono::Utc::now().timestamp_millis()))
            });
            std::fs::write(&path, bundle.to_pretty_json()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            ui::print_done(
                term,
                &format!(
                    "Exported {} conversations, {} preferences, {} history entries to {}",
                    bundle.conversations.len(),
                    bundle.preferences.len(),
                    bundle.history.len(),
                    path.display()
                ),
            );
        }
        Commands::Import { file } => {
            let text = read_file(&file)?;
            let summary = store
                .import_json(&text)
                .await
                .with_context(|| format!("failed to import {}", file.display()))?;
            ui::print_done(
                term,
                &format!(
                    "Imported {} conversations, {} preferences, {} history entries.",
                    summary.conversations, summary.preferences, summary.history
                ),
            );
        }
        Commands::Usage => {
            let usage = store.usage().await?;
            ui::render_usage(term, &usage);
        }
        Commands::Id => {
            println!("{}", store.anonymous_id().await?);
        }
        Commands::ClearAll { yes } => {
            if !yes
                && !dialoguer::Confirm::new()
                    .with_prompt("Erase all conversations, preferences and history?")
                    .default(false)
                    .interact()?
            {
                println!("Nothing erased.");
                return Ok(());
            }
            store.clear_all().await?;
            ui::print_done(term, "All local data erased.");
        }
        Commands::Endpoint { url } => match url {
            Some(url) => {
                store.remember_endpoint(&url).await?;
                ui::print_done(term, &format!("Endpoint set to {}", url.trim()));
            }
            None => match store.endpoint().await? {
                Some(url) => println!("{url}"),
                None => println!("No endpoint remembered."),
            },
        },
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Accept JSON literals, falling back to a plain string for bare words.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
