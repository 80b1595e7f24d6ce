//! # kb-chat CLI (`kbchat`)
//!
//! Runs the gateway and acts as its client: uploads files, keeps the local
//! knowledge-base registry, clears it, and chats.
//!
//! ## Usage
//!
//! ```bash
//! kbchat --config ./config/kbchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbchat serve` | Start the HTTP gateway |
//! | `kbchat list` | Show the local knowledge-base registry |
//! | `kbchat upload <files..>` | Upload and index files, recording them locally |
//! | `kbchat clear` | Remove every registered file remotely and locally |
//! | `kbchat ask "<text>"` | Send a single turn |
//! | `kbchat chat` | Interactive conversation |
//!
//! Client commands talk to the gateway at `[client].gateway_url`; pass
//! `--direct` to call OpenAI from this process instead.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use kb_chat::client::GatewayClient;
use kb_chat::config::{self, Config};
use kb_chat::index::{AssistantGateway, DocumentIndex};
use kb_chat::openai::OpenAIClient;
use kb_chat::registry::KnowledgeBaseRegistry;
use kb_chat::server;
use kb_chat::session::ChatSession;
use kb_chat::upload::{self, format_bytes};
use kb_chat::view::{spawn_listener, KnowledgeBaseView};

/// kb-chat: chat with an assistant grounded in your uploaded documents.
#[derive(Parser)]
#[command(
    name = "kbchat",
    about = "kb-chat: chat with an assistant grounded in your uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kbchat.toml`. A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/kbchat.toml")]
    config: PathBuf,

    /// Call OpenAI directly instead of going through the gateway.
    #[arg(long, global = true)]
    direct: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    ///
    /// Binds to `[server].bind` and serves `POST/PUT/DELETE /api/chat`
    /// and `GET /health`. Requires the OpenAI API key in the environment.
    Serve,

    /// List the knowledge bases recorded locally.
    List,

    /// Upload files, index them, and record them locally.
    ///
    /// All files are uploaded concurrently; one failing does not stop
    /// the others.
    Upload {
        /// Files to upload.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Delete every recorded file from the remote index and the local list.
    ///
    /// Files that fail to delete stay in the local list.
    Clear,

    /// Send a single turn and print the reply.
    Ask {
        /// The message to send.
        text: String,

        /// Vector store id to ground the reply in.
        #[arg(long)]
        store: Option<String>,

        /// Continuation token from a previous reply.
        #[arg(long)]
        previous: Option<String>,
    },

    /// Start an interactive conversation.
    Chat,
}

/// The two remote collaborators, either through the gateway or direct.
struct Remote {
    assistant: Arc<dyn AssistantGateway>,
    index: Arc<dyn DocumentIndex>,
}

impl Remote {
    fn connect(cfg: &Config, direct: bool) -> Result<Self> {
        if direct {
            let client = Arc::new(OpenAIClient::from_config(cfg)?);
            Ok(Self {
                assistant: client.clone(),
                index: client,
            })
        } else {
            let client = Arc::new(GatewayClient::from_config(cfg)?);
            Ok(Self {
                assistant: client.clone(),
                index: client,
            })
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kb_chat=info,tower_http=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_or_default(&cli.config)?;
    let registry = Arc::new(KnowledgeBaseRegistry::open(&cfg));

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::List => {
            print_registry(&registry);
        }
        Commands::Upload { paths } => {
            let remote = Remote::connect(&cfg, cli.direct)?;
            run_upload(&cfg, &registry, remote.index.as_ref(), &paths).await?;
        }
        Commands::Clear => {
            let entries = registry.load_all();
            if entries.is_empty() {
                println!("No files to clear from Knowledge Base.");
                return Ok(());
            }
            let remote = Remote::connect(&cfg, cli.direct)?;
            run_clear(&registry, remote.index.as_ref()).await?;
        }
        Commands::Ask {
            text,
            store,
            previous,
        } => {
            let remote = Remote::connect(&cfg, cli.direct)?;
            let mut session = ChatSession::new();
            session.set_scope(store);
            session.set_continuation(previous);
            let reply = session.send(remote.assistant.as_ref(), &text).await?;
            println!("{}", reply.response);
            if let Some(id) = reply.response_id {
                println!();
                println!("response id: {}", id);
            }
        }
        Commands::Chat => {
            let remote = Remote::connect(&cfg, cli.direct)?;
            run_chat(&cfg, registry, remote).await?;
        }
    }

    Ok(())
}

fn print_registry(registry: &KnowledgeBaseRegistry) {
    let entries = registry.load_all();
    if entries.is_empty() {
        println!("No knowledge bases registered.");
        return;
    }
    println!("{:<32} {:<32} VECTOR STORE", "NAME", "FILE ID");
    for e in &entries {
        println!("{:<32} {:<32} {}", e.name, e.file_id, e.collection_id);
    }
    println!("{} file(s)", entries.len());
}

async fn run_upload(
    cfg: &Config,
    registry: &KnowledgeBaseRegistry,
    index: &dyn DocumentIndex,
    paths: &[PathBuf],
) -> Result<()> {
    let files = upload::read_files(paths)?;
    let staging = upload::stage(files, &cfg.upload);
    for err in &staging.errors {
        eprintln!("rejected: {}", err);
    }
    if staging.tasks.is_empty() {
        bail!("No files to upload.");
    }

    for task in &staging.tasks {
        println!("queued     {} ({})", task.file.name, format_bytes(task.file.size()));
    }

    let report = upload::run_batch(staging.tasks, index, registry).await;
    for task in &report.tasks {
        match (&task.entry, &task.error) {
            (Some(entry), _) => println!(
                "{:<10} {} -> {} in {}",
                task.status.label(),
                task.file.name,
                entry.file_id,
                entry.collection_id
            ),
            (None, Some(err)) => {
                println!("{:<10} {} ({})", task.status.label(), task.file.name, err)
            }
            (None, None) => println!("{:<10} {}", task.status.label(), task.file.name),
        }
    }
    println!("{}", report.summary());
    Ok(())
}

async fn run_clear(registry: &KnowledgeBaseRegistry, index: &dyn DocumentIndex) -> Result<()> {
    let entries = registry.load_all();
    println!(
        "Attempting to clear {} file(s) from Knowledge Base...",
        entries.len()
    );
    let report = registry.clear_all(&entries, index).await;
    for o in &report.outcomes {
        let status = if o.success { "removed" } else { "failed" };
        match &o.error {
            Some(err) => println!("{:<8} {} ({})", status, o.entry.name, err),
            None => println!("{:<8} {}", status, o.entry.name),
        }
    }
    println!("{}", report.summary());
    Ok(())
}

const CHAT_HELP: &str = "\
Commands:
  /stores            list knowledge bases (* = active)
  /use <n|id>        toggle grounding in a knowledge base
  /clear-scope       stop grounding replies
  /upload <path..>   upload and index files
  /clear-kb          delete every knowledge base
  /reset             start a new conversation
  /quit              exit";

async fn run_chat(cfg: &Config, registry: Arc<KnowledgeBaseRegistry>, remote: Remote) -> Result<()> {
    let view = Arc::new(Mutex::new(KnowledgeBaseView::new(&registry)));
    let listener = spawn_listener(view.clone(), registry.bus().subscribe());
    let mut session = ChatSession::new();

    println!("{}", CHAT_HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", CHAT_HELP),
            "/stores" => {
                let details = view.lock().await.store_details();
                if details.is_empty() {
                    println!("No knowledge bases registered. Use /upload <path> to add one.");
                }
                for (i, d) in details.iter().enumerate() {
                    let mark = if d.is_active { "*" } else { " " };
                    println!("{} {:>2}. {} ({})", mark, i + 1, d.name, d.id);
                }
            }
            "/use" => {
                let mut view = view.lock().await;
                let target = match rest.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= view.entries().len() => {
                        Some(view.entries()[n - 1].collection_id.clone())
                    }
                    _ => view
                        .entries()
                        .iter()
                        .find(|e| e.collection_id == rest)
                        .map(|e| e.collection_id.clone()),
                };
                match target {
                    Some(id) => {
                        view.toggle(&id);
                        match view.selection() {
                            Some(s) => println!("Grounding replies in {}", s),
                            None => println!("Grounding cleared"),
                        }
                    }
                    None => println!("Unknown knowledge base: {}", rest),
                }
            }
            "/clear-scope" => {
                view.lock().await.clear_selection();
                println!("Grounding cleared");
            }
            "/upload" => {
                let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                if paths.is_empty() {
                    println!("Usage: /upload <path..>");
                    continue;
                }
                if let Err(e) = run_upload(cfg, &registry, remote.index.as_ref(), &paths).await {
                    println!("{}", e);
                }
            }
            "/clear-kb" => {
                if registry.load_all().is_empty() {
                    println!("No files to clear from Knowledge Base.");
                    continue;
                }
                if let Err(e) = run_clear(&registry, remote.index.as_ref()).await {
                    println!("{}", e);
                }
            }
            "/reset" => {
                session.reset();
                println!("Started a new conversation");
            }
            _ if command.starts_with('/') => println!("Unknown command: {}", command),
            _ => {
                let scope = view.lock().await.selection().map(str::to_string);
                session.set_scope(scope);
                match session.send(remote.assistant.as_ref(), line).await {
                    Ok(reply) => println!("\n{}\n", reply.response),
                    Err(e) => println!("\n[error] {}\n", e),
                }
            }
        }
    }

    listener.abort();
    Ok(())
}
