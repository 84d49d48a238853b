//! # Incident Context
//!
//! Retrieval-grounded evidence assembly and taxonomy classification over an
//! AI incident database.
//!
//! The pipeline imports incidents, reports, and taxonomy classifications
//! into SQLite, embeds them chunk by chunk, and answers two kinds of
//! questions: "which known incidents resemble this text" and "how would this
//! text be classified under a given taxonomy". Classification prompts are
//! grounded in retrieved evidence rather than the model's own recall.
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────┐
//! │ Snapshot │──▶│ Chunk + Embed │──▶│ SQLite  │
//! │  import  │   │   (indexer)   │   │ vectors │
//! └──────────┘   └───────────────┘   └────┬────┘
//!                                         │
//!                   ┌─────────────────────┤
//!                   ▼                     ▼
//!             ┌──────────┐          ┌──────────┐
//!             │ Evidence │          │ Classify │
//!             │ assembly │─────────▶│ (prompt) │
//!             └──────────┘          └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults |
//! | [`models`] | Domain types: incidents, reports, classifications |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`chunk`] | Overlapping word-accumulation chunker |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`retry`] | Backoff policy for external calls |
//! | [`index`] | Embedding index: insert and similarity search |
//! | [`resolver`] | id-to-record resolution over the relational store |
//! | [`evidence`] | Ranked, deduplicated evidence assembly |
//! | [`generation`] | Text generation collaborator |
//! | [`classify`] | Taxonomy-grounded classification |
//! | [`compare`] | Classification comparison for evaluation |
//! | [`indexer`] | Incremental embedding indexer |
//! | [`ingest`] | JSON snapshot import |
//! | [`search`] / [`stats`] | CLI output commands |
//! | [`server`] | JSON HTTP boundary |

pub mod chunk;
pub mod classify;
pub mod compare;
pub mod config;
pub mod db;
pub mod embedding;
pub mod evidence;
pub mod generation;
pub mod index;
pub mod indexer;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod search;
pub mod server;
pub mod stats;
