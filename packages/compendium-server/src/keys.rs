//! Key schema for the single item collection.
//!
//! ```text
//! entity      PK                    SK                         GSI1PK / GSI1SK               GSI2PK
//! Node        NODE|{id}             NODE|{id}                  NODES|RECENT / {version}|{id}  TYPE|{typeId}
//! Dependency  NODE|{dependantId}    DEPENDENCY|NODE|{depId}    -                             -
//! Type        TYPE                  TYPE|{id}                  -                             -
//! ```
//!
//! The `Inverse` index swaps PK and SK, so querying it with
//! `SK = DEPENDENCY|NODE|{id}` yields every edge pointing at `{id}`.

pub const ATTR_PK: &str = "PK";
pub const ATTR_SK: &str = "SK";
pub const ATTR_GSI1PK: &str = "GSI1PK";
pub const ATTR_GSI1SK: &str = "GSI1SK";
pub const ATTR_GSI2PK: &str = "GSI2PK";

pub const NODE_PREFIX: &str = "NODE|";
pub const DEPENDENCY_SK_PREFIX: &str = "DEPENDENCY|NODE|";
pub const TYPE_PARTITION: &str = "TYPE";
pub const TYPE_SK_PREFIX: &str = "TYPE|";
pub const RECENT_PARTITION: &str = "NODES|RECENT";

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey {
    pub pk: String,
    pub sk: String,
}

impl PrimaryKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// Recency index attributes denormalized onto a node item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub pk: String,
    pub sk: String,
}

/// `NODE|{id}`, the fully-qualified form stored in edge attributes.
pub fn qualify_node_id(id: &str) -> String {
    format!("{NODE_PREFIX}{id}")
}

/// Inverse of [`qualify_node_id`].
pub fn unqualify_node_id(qualified: &str) -> Option<&str> {
    qualified.strip_prefix(NODE_PREFIX)
}

pub fn node_key(id: &str) -> PrimaryKey {
    let qualified = qualify_node_id(id);
    PrimaryKey::new(qualified.clone(), qualified)
}

pub fn edge_key(dependant_id: &str, dependency_id: &str) -> PrimaryKey {
    PrimaryKey::new(
        qualify_node_id(dependant_id),
        format!("{DEPENDENCY_SK_PREFIX}{dependency_id}"),
    )
}

pub fn type_key(id: &str) -> PrimaryKey {
    PrimaryKey::new(TYPE_PARTITION, format!("{TYPE_SK_PREFIX}{id}"))
}

pub fn recent_index_keys(version: &str, id: &str) -> IndexKey {
    IndexKey {
        pk: RECENT_PARTITION.to_string(),
        sk: format!("{version}|{id}"),
    }
}

/// Partition value of the type grouping index (GSI2).
pub fn type_index_key(type_id: &str) -> String {
    format!("{TYPE_SK_PREFIX}{type_id}")
}

/// Sort key under which edges pointing at `dependency_id` are stored;
/// the partition to query on the `Inverse` index.
pub fn dependency_sort_key(dependency_id: &str) -> String {
    format!("{DEPENDENCY_SK_PREFIX}{dependency_id}")
}
