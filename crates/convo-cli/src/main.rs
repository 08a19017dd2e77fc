use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use convo_core::{
    is_message_id, new_message_id, BranchEdge, ChatMessage, Config, Message, Role, Tag, Topic,
};
use convo_engine::ConversationEngine;
use convo_llm::{OpenAIProvider, ProviderConfig};
use convo_store::{GraphStore, SqliteGraphStore};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "convo")]
#[command(about = "Branching conversation store backed by a chat-completion API")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to ./convo.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Print a fresh message id
    Msgid,
    /// Create a conversation root, optionally with a topic
    Seed {
        #[arg(long, default_value = "system")]
        role: Role,
        #[arg(long)]
        content: String,
        #[arg(long)]
        topic_title: Option<String>,
        #[arg(long, default_value = "")]
        topic_summary: String,
        #[arg(long, default_value = "")]
        topic_description: String,
        /// Topic tag as name=description, repeatable
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<Tag>,
    },
    /// Append a message under an existing one
    Append {
        parent: String,
        #[arg(long, default_value = "user")]
        role: Role,
        #[arg(long)]
        content: String,
    },
    /// Branch from a tip with one child per completion choice
    Ask {
        tip: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// Print the root-to-tip history
    History { tip: String },
    /// List the children of a message
    Children { id: String },
    /// Snapshot the history ending at a tip
    Snapshot { tip: String },
    /// List stored snapshots of a tip, newest first
    Snapshots {
        tip: String,
        #[arg(long, default_value_t = 1)]
        limit: usize,
    },
    /// Execute a snapshot replay script
    Replay { file: PathBuf },
}

fn parse_tag(raw: &str) -> Result<Tag, String> {
    match raw.split_once('=') {
        Some((name, description)) if !name.trim().is_empty() => {
            Ok(Tag::new(name.trim(), description.trim()))
        }
        _ => Err(format!("expected name=description, got {raw:?}")),
    }
}

fn check_id(id: &str) -> anyhow::Result<()> {
    if !is_message_id(id) {
        bail!("not a message id: {id}");
    }
    Ok(())
}

fn branch_json(message: &Message, edge: &BranchEdge) -> Value {
    json!({ "message": message, "edge": edge })
}

fn print(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(false),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    if let Commands::Msgid = cli.command {
        return print(&json!(new_message_id()));
    }

    let store = Arc::new(
        SqliteGraphStore::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open {}", config.database_path.display()))?
            .with_max_depth(config.max_history_depth),
    );
    let provider = OpenAIProvider::new(ProviderConfig::from(&config))
        .context("Failed to build completion provider")?;
    let engine = ConversationEngine::new(store.clone(), Arc::new(provider), config.model.clone());

    match cli.command {
        Commands::Msgid => print(&json!(new_message_id())),
        Commands::Init => {
            tracing::info!(database = %config.database_path.display(), "Database ready");
            print(&json!({ "database": config.database_path.display().to_string() }))
        }
        Commands::Seed {
            role,
            content,
            topic_title,
            topic_summary,
            topic_description,
            tags,
        } => {
            if topic_title.is_none() && !tags.is_empty() {
                bail!("--tag requires --topic-title");
            }
            let root = Message::from_chat(ChatMessage::new(role, content));
            store.insert_root(&root).await?;

            let topic = match topic_title {
                Some(title) => {
                    let topic = Topic {
                        title,
                        summary: topic_summary,
                        description: topic_description,
                    };
                    Some(store.attach_topic(&root.id, &topic, &tags).await?)
                }
                None => None,
            };
            print(&json!({ "message": root, "topic": topic }))
        }
        Commands::Append {
            parent,
            role,
            content,
        } => {
            check_id(&parent)?;
            let message = Message::from_chat(ChatMessage::new(role, content));
            let edge = store.append_message(&parent, &message).await?;
            print(&branch_json(&message, &edge))
        }
        Commands::Ask { tip, model } => {
            check_id(&tip)?;
            let created = engine.generate(&tip, model.as_deref()).await?;
            if created.is_empty() {
                tracing::warn!(tip = %tip, "No branches created");
            }
            let branches: Vec<Value> = created
                .iter()
                .map(|(message, edge)| branch_json(message, edge))
                .collect();
            print(&Value::Array(branches))
        }
        Commands::History { tip } => {
            check_id(&tip)?;
            let path = engine.resolve_path(&tip, true).await?;
            print(&json!({ "messages": path.messages, "topic": path.topic }))
        }
        Commands::Children { id } => {
            check_id(&id)?;
            let children: Vec<Value> = store
                .children(&id)
                .await?
                .iter()
                .map(|(message, edge)| branch_json(message, edge))
                .collect();
            print(&Value::Array(children))
        }
        Commands::Snapshot { tip } => {
            check_id(&tip)?;
            match engine.snapshot(&tip).await? {
                Some(snapshot) => print(&json!(snapshot)),
                None => bail!("snapshot of {tip} failed, see log for details"),
            }
        }
        Commands::Snapshots { tip, limit } => {
            check_id(&tip)?;
            let snapshots = engine.snapshots(&tip, limit).await?;
            print(&json!(snapshots))
        }
        Commands::Replay { file } => {
            let script = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            engine.replay(&script).await?;
            tracing::info!(file = %file.display(), "Replayed script");
            print(&json!({ "replayed": file.display().to_string() }))
        }
    }
}
