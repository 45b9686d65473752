//! # Dossier
//!
//! A local-first document mining pipeline for project archives.
//!
//! Dossier scans a directory of per-project folders (PDF reports, Excel
//! workbooks), splits every document into locator-tagged text fragments,
//! builds a TF-IDF index over them, and uses retrieval plus a budgeted
//! LLM call to distill each project into one structured key-parameters
//! record backed by evidence citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │   data/     │──▶│  Fragments   │──▶│  TF-IDF    │
//! │ PDF / XLSX  │   │ page / row  │   │  index     │
//! └─────────────┘   └──────┬──────┘   └────┬──────┘
//!                          │               │
//!                     ┌────▼────┐     ┌────▼─────┐
//!                     │ SQLite  │     │ Retrieval │
//!                     │ + BLOBs │     │ + LLM     │
//!                     └─────────┘     └────┬─────┘
//!                                          ▼
//!                                 outputs/<id>_key_params.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsr init                      # create database
//! dsr ingest                    # scan data/ into fragments
//! dsr build-index               # fit TF-IDF, store vectors
//! dsr extract                   # per-project LLM extraction
//! dsr query "site survey"       # rank fragments for a query
//! dsr reset                     # clear artifacts/ and outputs/
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Paths and environment settings |
//! | [`models`] | Core data types |
//! | [`sources`] | PDF and workbook fragment readers |
//! | [`ingest`] | Directory scan and fragment persistence |
//! | [`tfidf`] | TF-IDF fitting and transformation |
//! | [`rank`] | Cosine ranking over sparse and dense vectors |
//! | [`extractor`] | Evidence gathering and LLM extraction |
//! | [`llm`] | Cached, budgeted chat-completions gateway |
//! | [`costlog`] | Append-only spend ledger |
//! | [`db`] | Database connection and fragment storage |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod costlog;
pub mod db;
pub mod extractor;
pub mod index_cmd;
pub mod ingest;
pub mod jsonl;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod query;
pub mod rank;
pub mod reset;
pub mod sources;
pub mod tfidf;
