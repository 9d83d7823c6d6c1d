//! # mdrag CLI
//!
//! Grounded question answering over a directory of Markdown files.
//!
//! ## Usage
//!
//! ```bash
//! mdrag --config ./config/mdrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdrag init` | Create the SQLite database and run schema migrations |
//! | `mdrag sync` | Diff the document root against the store |
//! | `mdrag documents` | List tracked documents and their status |
//! | `mdrag show <file>` | Print one document record and its content |
//! | `mdrag reindex [FILES]` | Chunk and embed new/modified (or named) documents |
//! | `mdrag cleanup` | Drop documents whose files were deleted |
//! | `mdrag search "<q>"` | Show the evidence retrieval finds for a question |
//! | `mdrag ask "<q>"` | Answer a question from the documentation |
//! | `mdrag stats` | Index overview |
//! | `mdrag serve` | Start the HTTP API |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mdrag::config;
use mdrag::engine::Engine;
use mdrag::{db, migrate, server, stats};
use mdrag_core::models::DocumentStatus;

#[derive(Parser)]
#[command(
    name = "mdrag",
    about = "Grounded question answering over a Markdown corpus",
    version,
    long_about = "mdrag tracks a directory of Markdown files, splits them into heading-aware \
    chunks, embeds them into a local SQLite store, and answers questions with cited sources \
    through a CLI and a JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mdrag.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Scan the document root and update document statuses.
    ///
    /// Sync never chunks or embeds; run `reindex` afterwards.
    Sync,

    /// List tracked documents.
    Documents {
        /// Only show documents with this status (new, modified, indexed, deleted).
        #[arg(long)]
        status: Option<DocumentStatus>,
    },

    /// Show one document record and its current content.
    Show {
        /// Path relative to the document root.
        filename: String,
    },

    /// Chunk and embed documents.
    ///
    /// Without arguments, reindexes every new or modified document.
    Reindex {
        /// Documents to reindex, relative to the document root.
        files: Vec<String>,

        /// Reindex every document that is not deleted.
        #[arg(long, conflicts_with = "files")]
        all: bool,
    },

    /// Remove documents whose files no longer exist, with their chunks.
    Cleanup,

    /// Show the evidence retrieval returns for a question.
    Search {
        query: String,

        /// Maximum results (defaults to retrieval.top_k).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from the indexed documentation.
    Ask { question: String },

    /// Print index statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mdrag=debug,mdrag_core=debug,info"
    } else {
        "mdrag=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        pool.close().await;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = Engine::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Sync => {
            let report = engine.sync().await?;
            println!(
                "Sync complete: {} document(s), {} changed",
                report.documents.len(),
                report.changed
            );
            println!(
                "  new: {}  modified: {}  indexed: {}  deleted: {}",
                report.stats.new, report.stats.modified, report.stats.indexed, report.stats.deleted
            );
            for file in &report.failed {
                println!("  failed to read: {}", file);
            }
        }
        Commands::Documents { status } => {
            let list = engine.list_documents(status).await?;
            if list.documents.is_empty() {
                println!("No documents.");
            }
            for doc in &list.documents {
                let indexed = doc
                    .indexed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:<9} {}  (indexed: {})", doc.status.as_str(), doc.filename, indexed);
            }
            println!();
            println!(
                "{} shown; new: {}  modified: {}  indexed: {}  deleted: {}",
                list.total,
                list.stats.new,
                list.stats.modified,
                list.stats.indexed,
                list.stats.deleted
            );
        }
        Commands::Show { filename } => {
            let detail = engine.get_document(&filename).await?;
            let doc = &detail.record;
            println!("--- Document ---");
            println!("filename:     {}", doc.filename);
            println!("status:       {}", doc.status);
            println!(
                "content_hash: {}",
                doc.content_hash.as_deref().unwrap_or("(never indexed)")
            );
            println!("current_hash: {}", doc.current_hash.as_deref().unwrap_or("(missing)"));
            if let Some(at) = doc.indexed_at {
                println!("indexed_at:   {}", at.to_rfc3339());
            }
            println!("updated_at:   {}", doc.updated_at.to_rfc3339());
            println!();
            println!("--- Content ---");
            println!("{}", detail.content);
        }
        Commands::Reindex { files, all } => {
            let report = if all {
                engine.reindex_all().await?
            } else {
                engine.reindex_selective(&files).await?
            };
            println!("{}", report.message);
            for file in &report.failed_files {
                println!("  failed: {}", file);
            }
        }
        Commands::Cleanup => {
            let report = engine.cleanup_deleted().await?;
            println!("{}", report.message);
        }
        Commands::Search { query, limit } => {
            let top_k = limit.unwrap_or(engine.config().retrieval.top_k);
            let evidence = engine.retriever().retrieve_top(&query, top_k).await?;
            if evidence.is_empty() {
                println!("No results.");
            }
            for (i, e) in evidence.iter().enumerate() {
                let heading = if e.heading_path.is_empty() {
                    "(no heading)"
                } else {
                    e.heading_path.as_str()
                };
                println!("{}. [{:.3}] {} / {}", i + 1, e.relevance_score, e.source_file, heading);
                println!("    chunk: {}", e.chunk_index);
                println!("    excerpt: \"{}\"", e.preview.replace('\n', " ").trim());
                println!();
            }
        }
        Commands::Ask { question } => {
            let response = engine.chat(&question, None).await?;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for s in &response.sources {
                    match &s.heading {
                        Some(h) => println!(
                            "  [{}] {} / {} ({:.3})",
                            s.index, s.file, h, s.relevance_score
                        ),
                        None => {
                            println!("  [{}] {} ({:.3})", s.index, s.file, s.relevance_score)
                        }
                    }
                }
            }
        }
        Commands::Stats => {
            stats::print_stats(&engine).await?;
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| engine.config().server.bind.clone());
            server::run_server(Arc::new(engine), &bind).await?;
        }
    }

    Ok(())
}
