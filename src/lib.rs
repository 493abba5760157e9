// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # brick-agent
//!
//! Answers natural-language questions about a building by iteratively
//! building and verifying SPARQL queries against its Brick knowledge graph.
//!
//! ## Architecture
//!
//! - **Graph store** (`graph`): oxigraph-backed Brick graph with search, describe and SPARQL
//! - **Agent** (`agent`): proposer, duplicate guard and budgeted loop controller
//! - **Configuration** (`config`): TOML settings for the loop, the store and the LLM
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use brick_agent::agent::{FallbackProposer, LoopConfig, LoopController};
//! use brick_agent::graph::{BrickStore, StoreConfig};
//!
//! let store = BrickStore::in_memory(StoreConfig::default()).unwrap();
//! store.load_turtle_file("building.ttl".as_ref()).unwrap();
//! store.ingest_timeseries_csv("fcu.csv".as_ref()).unwrap();
//!
//! let mut controller = LoopController::new(
//!     Arc::new(store),
//!     Box::new(FallbackProposer::new()),
//!     LoopConfig::default(),
//! );
//! let outcome = controller.run("What is the room temperature?").unwrap();
//! if let Some(best) = outcome.best() {
//!     println!("{}\n{}", best.query, best.to_table(10));
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod graph;
