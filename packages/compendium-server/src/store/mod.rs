//! Item store: the single keyed item collection plus its secondary indexes.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};

use crate::codec::{AttributeValue, Item};
use crate::error::{CompendiumError, Result};
use crate::keys::{PrimaryKey, ATTR_GSI1PK, ATTR_GSI1SK, ATTR_GSI2PK, ATTR_PK, ATTR_SK};
use crate::statement::Statement;

/// Indexes an item can be queried through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexName {
    Primary,
    /// SK as partition, PK as sort.
    Inverse,
    /// GSI1: recency bucket, `{version}|{id}` sort.
    Recent,
    /// GSI2: `TYPE|{typeId}` partition, SK sort.
    ByType,
}

impl IndexName {
    pub const SECONDARY: [IndexName; 3] = [IndexName::Inverse, IndexName::Recent, IndexName::ByType];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexName::Primary => "PRIMARY",
            IndexName::Inverse => "Inverse",
            IndexName::Recent => "GSI1",
            IndexName::ByType => "GSI2",
        }
    }

    /// (partition attribute, sort attribute) this index is keyed on.
    pub fn key_attributes(&self) -> (&'static str, &'static str) {
        match self {
            IndexName::Primary => (ATTR_PK, ATTR_SK),
            IndexName::Inverse => (ATTR_SK, ATTR_PK),
            IndexName::Recent => (ATTR_GSI1PK, ATTR_GSI1SK),
            IndexName::ByType => (ATTR_GSI2PK, ATTR_SK),
        }
    }

    /// Index key of `item`, or `None` when the item is not projected into it.
    pub fn key_of(&self, item: &Item) -> Option<(String, String)> {
        let (p, s) = self.key_attributes();
        let partition = item.get(p).and_then(AttributeValue::as_s)?;
        let sort = item.get(s).and_then(AttributeValue::as_s)?;
        Some((partition.to_string(), sort.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Key condition query: one partition, optional sort-key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub index: IndexName,
    pub partition: String,
    pub sort_prefix: Option<String>,
    pub direction: Direction,
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn new(index: IndexName, partition: impl Into<String>) -> Self {
        Self {
            index,
            partition: partition.into(),
            sort_prefix: None,
            direction: Direction::Forward,
            limit: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.direction = Direction::Backward;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage collaborator the workflow and readers talk to.
///
/// Send + Sync required: ingestion fans out across rayon workers that all
/// share one store.
pub trait ItemStore: Send + Sync {
    // === ITEM OPERATIONS ===

    /// Insert or replace the item at its (PK, SK).
    fn put_item(&self, item: Item) -> Result<()>;

    fn get_item(&self, key: &PrimaryKey) -> Result<Option<Item>>;

    /// Returns whether an item was removed. Missing keys are not an error.
    fn delete_item(&self, key: &PrimaryKey) -> Result<bool>;

    // === READS ===

    fn query(&self, request: &QueryRequest) -> Result<Vec<Item>>;

    fn execute_statement(&self, statement: &Statement) -> Result<Vec<Item>>;

    // === MAINTENANCE ===

    fn item_count(&self) -> usize;

    /// Make all accepted writes durable. No-op for purely in-memory stores.
    fn flush(&self) -> Result<()>;
}

/// Primary key of an item, failing when PK or SK is absent.
pub fn primary_key_of(item: &Item) -> Result<PrimaryKey> {
    IndexName::Primary
        .key_of(item)
        .map(|(pk, sk)| PrimaryKey::new(pk, sk))
        .ok_or_else(|| CompendiumError::invalid_input("item must carry string PK and SK attributes"))
}
