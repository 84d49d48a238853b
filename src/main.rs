//! # Incident Context CLI (`aic`)
//!
//! The `aic` binary drives the incident retrieval and classification
//! pipeline: database initialization, snapshot import, embedding indexing,
//! similarity search, evidence assembly, classification, and the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! aic --config ./config/aic.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aic init` | Create the SQLite database and run schema migrations |
//! | `aic import <file>` | Import a JSON snapshot of incidents/reports/taxonomies |
//! | `aic index` | Embed everything not yet in the embedding index |
//! | `aic search "<query>"` | Similarity search over the index |
//! | `aic evidence "<question>"` | Assemble similar incidents as evidence |
//! | `aic classify "<text>" -t <taxonomy>` | Classify a text under a taxonomy |
//! | `aic stats` | Database and embedding coverage summary |
//! | `aic serve` | Start the JSON HTTP server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use incident_context::{
    classify, config, db, embedding, evidence, generation, index, indexer, ingest, migrate,
    resolver, search, server, stats,
};

/// Incident Context CLI — retrieval-grounded evidence assembly and taxonomy
/// classification over an AI incident database.
#[derive(Parser)]
#[command(
    name = "aic",
    about = "Incident Context — retrieval-grounded evidence and classification over an AI incident database",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aic.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Import a JSON snapshot of incidents, reports, taxonomies, and
    /// classifications. Re-importing refreshes records in place.
    Import {
        /// Path to the snapshot JSON file.
        file: PathBuf,
    },

    /// Embed everything not yet present in the embedding index.
    ///
    /// Requires an embedding provider to be configured.
    Index,

    /// Similarity search over the embedding index.
    Search {
        /// The search query string.
        query: String,

        /// Exclusive similarity threshold.
        #[arg(long)]
        min_score: Option<f32>,

        /// Maximum number of results to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Assemble similar incidents as evidence for a question.
    Evidence {
        /// The question or incident text.
        question: String,

        /// Attach each incident's classifications.
        #[arg(long)]
        classifications: bool,

        /// Number of report texts to attach per incident.
        #[arg(long, default_value_t = 0)]
        report_text: usize,

        /// Maximum number of incidents.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Classify a text under a taxonomy, grounded in similar incidents.
    Classify {
        /// The incident text to classify.
        text: String,

        /// Taxonomy namespace (e.g. "CSETv1").
        #[arg(short, long)]
        taxonomy: String,

        /// Classify only these attributes, one generation call each.
        #[arg(short, long, value_delimiter = ',')]
        attributes: Option<Vec<String>>,

        /// Print the prompt instead of calling the generator.
        #[arg(long)]
        dry_run: bool,
    },

    /// Database and embedding coverage summary.
    Stats,

    /// Start the JSON HTTP server.
    Serve,
}

/// Components every retrieval command needs.
struct Retrieval {
    assembler: evidence::EvidenceAssembler,
    resolver: resolver::EntityResolver,
}

async fn build_retrieval(cfg: &config::Config) -> Result<Retrieval> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    let provider: Arc<dyn embedding::EmbeddingProvider> =
        Arc::from(embedding::create_provider(&cfg.embedding, cfg.retry)?);
    let resolver = resolver::EntityResolver::new(pool.clone(), cfg.retrieval.join_batch_size);
    let assembler = evidence::EvidenceAssembler::new(
        provider,
        index::EmbeddingIndex::new(pool),
        resolver.clone(),
        cfg.retrieval.clone(),
    );
    Ok(Retrieval {
        assembler,
        resolver,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let report = ingest::import_snapshot(&pool, &file).await?;
            println!(
                "Imported {} incidents, {} reports, {} taxonomies, {} classifications ({} links)",
                report.incidents, report.reports, report.taxa, report.classifications, report.links
            );
        }
        Commands::Index => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let provider: Arc<dyn embedding::EmbeddingProvider> =
                Arc::from(embedding::create_provider(&cfg.embedding, cfg.retry)?);
            let indexer = indexer::Indexer::new(
                provider,
                index::EmbeddingIndex::new(pool.clone()),
                resolver::EntityResolver::new(pool, cfg.retrieval.join_batch_size),
                cfg.chunking.clone(),
                cfg.embedding.concurrency,
            );
            let report = indexer.run().await?;
            println!(
                "Indexed {} items ({} chunks), skipped {}, failed {}",
                report.processed, report.chunks_written, report.skipped, report.failed
            );
        }
        Commands::Search {
            query,
            min_score,
            limit,
        } => {
            let retrieval = build_retrieval(&cfg).await?;
            let min_score = min_score.unwrap_or(cfg.retrieval.min_score);
            search::run_search(&retrieval.assembler, &query, min_score, limit).await?;
        }
        Commands::Evidence {
            question,
            classifications,
            report_text,
            limit,
        } => {
            let retrieval = build_retrieval(&cfg).await?;
            let incidents = retrieval
                .assembler
                .find_similar_incidents_by_text(&question, classifications, limit, report_text)
                .await?;
            println!("{}", serde_json::to_string_pretty(&incidents)?);
        }
        Commands::Classify {
            text,
            taxonomy,
            attributes,
            dry_run,
        } => {
            let retrieval = build_retrieval(&cfg).await?;

            if dry_run {
                // No generator needed to render the prompt.
                let taxonomy_data = retrieval.resolver.fetch_taxonomy_details(&taxonomy).await?;
                let set = retrieval
                    .assembler
                    .similar_incidents_classifications(&text, &taxonomy)
                    .await?;
                let rendered = evidence::render_evidence(&set);
                println!(
                    "{}",
                    classify::full_taxonomy_prompt(&text, &taxonomy_data, &rendered)
                );
                return Ok(());
            }

            let generator: Arc<dyn generation::TextGenerator> =
                Arc::from(generation::create_generator(&cfg.generation, cfg.retry)?);
            let classifier = classify::Classifier::new(
                retrieval.assembler,
                retrieval.resolver,
                generator,
                cfg.generation.concurrency,
            );

            match attributes {
                None => {
                    let outcome = classifier.classify(&text, &taxonomy).await?;
                    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
                }
                Some(names) => {
                    let outcomes = classifier
                        .classify_attributes(&text, &taxonomy, &names)
                        .await?;
                    let merged = classify::merge_attribute_outcomes(&taxonomy, &outcomes);
                    println!("{}", serde_json::to_string_pretty(&merged)?);
                }
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
