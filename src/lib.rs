//! # docgraph
//!
//! A local-first document knowledge base over SQLite.
//!
//! docgraph ingests text documents, chunks and embeds them, extracts entity
//! mentions with rule-based patterns, asks a reasoning model how documents
//! relate to each other, and answers queries through hybrid (vector +
//! lexical) search and graph traversal.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────────┐   ┌───────────┐
//! │  Files    │──▶│     Pipeline        │──▶│  SQLite    │
//! │ .md .txt  │   │ Chunk+Embed+Extract │   │ FTS5+Vec  │
//! └───────────┘   └────────────────────┘   └─────┬─────┘
//!                                                │
//!                      ┌─────────────────────────┤
//!                      ▼                         ▼
//!                ┌───────────┐            ┌────────────┐
//!                │  Search    │            │   Graph     │
//!                │ RRF hybrid │            │ entity/rel │
//!                └───────────┘            └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dgx init                          # create database
//! dgx ingest ./contracts            # chunk, embed, extract entities
//! dgx relations extract             # judge document pairs
//! dgx search "payment terms"        # hybrid search
//! dgx entity "Acme" --type ORG      # documents mentioning an entity
//! dgx related <document-id>         # one-hop relation neighborhood
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Text chunking with overlap |
//! | [`embedding`] | Embedding clients and batching |
//! | [`entities`] | Rule-based entity extraction |
//! | [`relations`] | Model-judged document relations |
//! | [`ingest`] | Idempotent document ingestion |
//! | [`search`] | Reciprocal-rank hybrid search |
//! | [`graph`] | Entity and relation queries |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod get;
pub mod graph;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod relations;
pub mod search;
pub mod stats;
