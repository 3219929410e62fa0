use anyhow::{Context, Result, bail};
use chatrag::config::{self, Config};
use chatrag::db::RecordStore;
use chatrag::history::ConversationHistory;
use chatrag::mcp::{McpContext, McpServer};
use chatrag::uploads;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatrag")]
#[command(about = "Document-grounded chat with token accounting")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file (default: chatrag.json)
    #[arg(short, long, global = true, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the MCP tools on stdio
    Serve,

    /// Upload and index documents (files, directories or glob patterns)
    Ingest {
        #[arg(required = true)]
        inputs: Vec<String>,
    },

    /// Manage chat sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Ask a question in a session
    Ask {
        #[arg(short, long)]
        session: i64,

        question: String,
    },

    /// Answer the session's last unanswered question
    Retry {
        #[arg(short, long)]
        session: i64,
    },

    /// Show a session's messages and token usage
    History {
        #[arg(short, long)]
        session: i64,
    },

    /// List indexed documents
    Documents,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a session
    New {
        #[arg(short, long)]
        owner: String,
    },
    /// List sessions
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let ctx = McpContext::open(config)?;

    match cli.command {
        Commands::Serve => {
            info!("Starting chatrag MCP server...");
            McpServer::new(ctx).start().await?;
        }
        Commands::Ingest { inputs } => ingest(&ctx, &inputs).await?,
        Commands::Session { command } => match command {
            SessionCommands::New { owner } => {
                let session = ctx.answerer.create_session(&owner).await?;
                println!("{}", session.id);
            }
            SessionCommands::List => {
                for s in ctx.store.list_sessions()? {
                    println!("{}\t{}\t{}", s.id, s.owner, s.created_at.to_rfc3339());
                }
            }
        },
        Commands::Ask { session, question } => {
            let answer = ctx.answerer.post_question(session, &question).await?;
            println!("{}", answer.text);
            eprintln!(
                "[tokens: {} in / {} out]",
                answer.input_tokens, answer.output_tokens
            );
        }
        Commands::Retry { session } => {
            let answer = ctx.answerer.retry_pending(session).await?;
            println!("{}", answer.text);
            eprintln!(
                "[tokens: {} in / {} out]",
                answer.input_tokens, answer.output_tokens
            );
        }
        Commands::History { session } => history(&ctx, session)?,
        Commands::Documents => {
            for d in ctx.store.list_documents()? {
                println!(
                    "{}\t{}\t{} chunks",
                    d.name,
                    d.uploaded_at.to_rfc3339(),
                    d.chunk_count
                );
            }
        }
    }

    Ok(())
}

async fn ingest(ctx: &McpContext, inputs: &[String]) -> Result<()> {
    let files = config::expand_inputs(inputs)?;
    if files.is_empty() {
        bail!("no input files found");
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("█▓░"),
    );

    let upload_dir = ctx.config.upload_dir();
    let (mut indexed, mut failed) = (0usize, 0usize);
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        pb.set_message(name.clone());

        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let handle = uploads::receive_upload(&ctx.store, &upload_dir, &name, &bytes)?;

        match ctx.indexer.ingest(&handle).await {
            Ok(chunks) => {
                indexed += 1;
                pb.println(format!("  indexed {name} ({chunks} chunks)"));
            }
            Err(e) => {
                failed += 1;
                let kind = if e.is_transient() { "retry later" } else { "rejected" };
                warn!("{name} ({kind}): {e}");
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("Indexed {indexed} file(s), {failed} failed");
    Ok(())
}

fn history(ctx: &McpContext, session_id: i64) -> Result<()> {
    let messages = ctx.store.list_messages(session_id)?;
    for m in &messages {
        if m.input_tokens > 0 || m.output_tokens > 0 {
            println!(
                "[{}] {}: {}  ({} in / {} out)",
                m.created_at.format("%Y-%m-%d %H:%M:%S"),
                m.role,
                m.content,
                m.input_tokens,
                m.output_tokens
            );
        } else {
            println!(
                "[{}] {}: {}",
                m.created_at.format("%Y-%m-%d %H:%M:%S"),
                m.role,
                m.content
            );
        }
    }

    if let Some(q) = ConversationHistory::from_messages(&messages).pending_question() {
        println!("(unanswered: {q})");
    }

    let usage = ctx.store.session_usage(session_id)?;
    println!(
        "Total tokens: {} ({} in / {} out)",
        usage.total_tokens(),
        usage.input_tokens,
        usage.output_tokens
    );
    Ok(())
}
