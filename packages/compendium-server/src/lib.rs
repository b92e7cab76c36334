//! Compendium: a versioned dependency graph of typed nodes.
//!
//! Nodes are ingested in batches. Each run stamps every node and every
//! dependency edge it asserts with one version, then deletes the edges a
//! node asserted in an earlier version but no longer declares.

pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod protocol;
pub mod query;
pub mod server;
pub mod service;
pub mod statement;
pub mod store;
pub mod workflow;

pub use config::CompendiumConfig;
pub use error::{CompendiumError, Result};
pub use model::{DependencyEdge, IngestBatch, Node, NodeInput, NodeType, ResolvedEdge};
pub use service::Compendium;
pub use store::{FileStore, ItemStore, MemoryStore};
pub use workflow::{RunId, RunReport, RunStatus};
