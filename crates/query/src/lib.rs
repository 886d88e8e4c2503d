//! # dictcache query (`query`)
//!
//! ## Purpose
//!
//! `query` answers lookups over dictionaries cached by the `storage` crate. It
//! searches one or many logical databases at once, filters records by exact
//! payload fields, matches keywords against a record's name and input codes,
//! and resolves batches of item codes.
//!
//! ## Core Types
//!
//! - [`StoreHandle`]: immutable builder naming the databases, the table, and an
//!   optional [`ExactFilter`]; entry point for every operation.
//! - [`QueryEngine`]: fans a [`SearchRequest`] out to every database and
//!   aggregates the hits through the completion barrier in [`barrier`].
//! - [`QueryResult`]: status, ordered [`Hit`]s tagged with their origin
//!   database, a message, and per-database [`DatabaseFailure`]s.
//! - [`QueryConfig`]: preview cap and [`AuxFieldMode`].
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use storage::InMemoryEngine;
//! use query::{ExactFilter, StoreHandle};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let engine = Arc::new(InMemoryEngine::new());
//! let drugs = StoreHandle::new(engine.clone(), "drugs");
//! drugs
//!     .load(Some(2), vec![
//!         json!({"itemCode": "A1", "itemName": "Aspirin", "type": "drug"}),
//!         json!({"itemCode": "B2", "itemName": "Bandage", "type": "supply"}),
//!     ])
//!     .await
//!     .unwrap();
//!
//! let result = drugs
//!     .clone()
//!     .where_exact(ExactFilter::new().with("type", "drug"))
//!     .search("asp")
//!     .await;
//! assert!(result.is_success());
//! assert_eq!(result.records[0].payload["itemCode"], "A1");
//!
//! let found = drugs.match_codes(&["B2"]).await.unwrap();
//! assert_eq!(found.len(), 1);
//! # });
//! ```
//!
//! ## Failure Model
//!
//! Searches never fail as a whole: a database that cannot be opened or lacks
//! the table adds a [`DatabaseFailure`] and no hits. Only when every database
//! fails is the result a [`QueryStatus::SoftFailure`]. Single-database
//! operations reject multi-database handles with [`QueryError::MultipleDatabases`]
//! before touching storage.

pub mod barrier;
pub mod engine;
pub mod filter;
pub mod handle;
pub mod keyword;
pub mod types;

#[cfg(test)]
mod testing;

pub use crate::engine::{QueryEngine, SearchRequest};
pub use crate::filter::{is_wildcard, matches_exact};
pub use crate::handle::StoreHandle;
pub use crate::keyword::{matches_keyword, KeywordMatcher};
pub use crate::types::{
    AuxFieldMode, DatabaseFailure, ExactFilter, Hit, QueryConfig, QueryError, QueryResult,
    QueryStatus, Target, DEFAULT_PREVIEW_LIMIT,
};
