//! # Dossier CLI (`dsr`)
//!
//! The `dsr` binary drives the document mining pipeline end to end:
//! database initialization, ingestion, index building, per-project LLM
//! extraction, ad-hoc queries, and workspace reset.
//!
//! ## Usage
//!
//! ```bash
//! dsr --root ./workspace <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsr init` | Create the SQLite database and run schema migrations |
//! | `dsr ingest` | Scan `data/` into locator-tagged fragments |
//! | `dsr build-index` | Fit the TF-IDF index and store fragment vectors |
//! | `dsr extract` | Produce one key-parameters record per project |
//! | `dsr query "<text>"` | Rank stored fragments against a query |
//! | `dsr reset` | Clear `artifacts/` and `outputs/` |
//!
//! ## Examples
//!
//! ```bash
//! # Full pipeline over ./workspace/data
//! dsr --root ./workspace ingest
//! dsr --root ./workspace build-index
//! dsr --root ./workspace extract
//!
//! # Ad-hoc retrieval
//! dsr --root ./workspace query "קבלן ראשי"
//! ```
//!
//! Extraction reads `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL`,
//! and `TOKEN_BUDGET_USD` from the environment; without a key it still
//! runs and writes stub records.

mod cache;
mod config;
mod costlog;
mod db;
mod extractor;
mod index_cmd;
mod ingest;
mod jsonl;
mod llm;
mod migrate;
mod models;
mod query;
mod rank;
mod reset;
mod sources;
mod tfidf;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Dossier CLI: mine per-project key parameters out of a directory of
/// PDF reports and Excel workbooks.
#[derive(Parser)]
#[command(
    name = "dsr",
    about = "Dossier: TF-IDF retrieval and LLM extraction over project document archives",
    version,
    long_about = "Dossier scans a directory of per-project folders, fragments every PDF page and \
    workbook row, builds a TF-IDF index, and distills each project into one structured \
    key-parameters record with evidence citations via a cached, budget-capped LLM call."
)]
struct Cli {
    /// Workspace root containing `data/`, `artifacts/`, and `outputs/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent; the other commands also run migrations
    /// before touching the database.
    Init,

    /// Scan `data/<project>/` folders into text fragments.
    ///
    /// Reads every PDF page and workbook row, writes
    /// `artifacts/fragments.jsonl` plus the positional id file, and
    /// upserts each fragment into the database.
    Ingest,

    /// Fit the TF-IDF index over the ingested fragments.
    ///
    /// Writes `artifacts/tfidf.json`, copies the fragment file to
    /// `outputs/index.jsonl`, and stores one dense vector per fragment.
    BuildIndex,

    /// Extract key parameters for every project.
    ///
    /// Gathers ranked evidence per project, sends one prompt through the
    /// cached LLM gateway, and writes `outputs/<id>_key_params.json`,
    /// the manifest, and the database record.
    Extract,

    /// Rank stored fragments against a free-text query.
    ///
    /// Prints the top matches as JSON with file, locator, score, and a
    /// short snippet.
    Query {
        /// The query string.
        query: String,
    },

    /// Clear `artifacts/` and `outputs/`.
    ///
    /// Source files under `data/` and the database are left alone.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.root)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            ingest::run_ingest(&cfg).await?;
        }
        Commands::BuildIndex => {
            index_cmd::run_build_index(&cfg).await?;
        }
        Commands::Extract => {
            extractor::run_extract(&cfg).await?;
        }
        Commands::Query { query } => {
            query::run_query(&cfg, &query).await?;
        }
        Commands::Reset => {
            reset::run_reset(&cfg)?;
        }
    }

    Ok(())
}
