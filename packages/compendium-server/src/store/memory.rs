//! In-memory item collection with ordered secondary indexes.
//!
//! Every put/delete updates the primary map and the index sets under one
//! write lock, so readers never observe an item without its index entries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use super::{primary_key_of, Direction, IndexName, ItemStore, QueryRequest};
use crate::codec::Item;
use crate::error::Result;
use crate::keys::PrimaryKey;
use crate::statement::Statement;

/// (partition, sort, primary key). The primary key breaks ties so that
/// several items may share one index key.
type IndexEntry = (String, String, PrimaryKey);

#[derive(Default)]
struct Tables {
    items: BTreeMap<PrimaryKey, Item>,
    indexes: HashMap<IndexName, BTreeSet<IndexEntry>>,
}

impl Tables {
    fn unindex(&mut self, key: &PrimaryKey, item: &Item) {
        for index in IndexName::SECONDARY {
            if let Some((p, s)) = index.key_of(item) {
                if let Some(set) = self.indexes.get_mut(&index) {
                    set.remove(&(p, s, key.clone()));
                }
            }
        }
    }

    fn index(&mut self, key: &PrimaryKey, item: &Item) {
        for index in IndexName::SECONDARY {
            if let Some((p, s)) = index.key_of(item) {
                self.indexes
                    .entry(index)
                    .or_default()
                    .insert((p, s, key.clone()));
            }
        }
    }

    /// Primary keys matching the key condition, in index order.
    fn matching_keys(&self, request: &QueryRequest) -> Vec<PrimaryKey> {
        let prefix = request.sort_prefix.as_deref().unwrap_or("");
        match request.index {
            IndexName::Primary => {
                let start = PrimaryKey::new(request.partition.as_str(), prefix);
                self.items
                    .range((Bound::Included(start), Bound::Unbounded))
                    .map(|(k, _)| k)
                    .take_while(|k| k.pk == request.partition && k.sk.starts_with(prefix))
                    .cloned()
                    .collect()
            }
            secondary => {
                let Some(set) = self.indexes.get(&secondary) else {
                    return Vec::new();
                };
                let start = (
                    request.partition.clone(),
                    prefix.to_string(),
                    PrimaryKey::new("", ""),
                );
                set.range((Bound::Included(start), Bound::Unbounded))
                    .take_while(|(p, s, _)| *p == request.partition && s.starts_with(prefix))
                    .map(|(_, _, k)| k.clone())
                    .collect()
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, rebuilding every index.
    pub fn from_items(items: Vec<Item>) -> Result<Self> {
        let mut tables = Tables::default();
        for item in items {
            let key = primary_key_of(&item)?;
            tables.index(&key, &item);
            tables.items.insert(key, item);
        }
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// All items in primary key order.
    pub fn snapshot(&self) -> Result<Vec<Item>> {
        let tables = self.tables.read()?;
        Ok(tables.items.values().cloned().collect())
    }
}

impl ItemStore for MemoryStore {
    fn put_item(&self, item: Item) -> Result<()> {
        let key = primary_key_of(&item)?;
        let mut tables = self.tables.write()?;
        if let Some(old) = tables.items.remove(&key) {
            tables.unindex(&key, &old);
        }
        tables.index(&key, &item);
        tables.items.insert(key, item);
        Ok(())
    }

    fn get_item(&self, key: &PrimaryKey) -> Result<Option<Item>> {
        Ok(self.tables.read()?.items.get(key).cloned())
    }

    fn delete_item(&self, key: &PrimaryKey) -> Result<bool> {
        let mut tables = self.tables.write()?;
        match tables.items.remove(key) {
            Some(old) => {
                tables.unindex(key, &old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn query(&self, request: &QueryRequest) -> Result<Vec<Item>> {
        let tables = self.tables.read()?;
        let mut keys = tables.matching_keys(request);
        if request.direction == Direction::Backward {
            keys.reverse();
        }
        let limit = request.limit.unwrap_or(usize::MAX);
        Ok(keys
            .iter()
            .filter_map(|k| tables.items.get(k))
            .take(limit)
            .cloned()
            .collect())
    }

    fn execute_statement(&self, statement: &Statement) -> Result<Vec<Item>> {
        let request = QueryRequest::new(IndexName::Primary, statement.predicate.partition.as_str())
            .with_prefix(statement.predicate.sort_prefix.as_str());
        let mut out = Vec::new();
        for item in self.query(&request)? {
            if statement.matches(&item)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    fn item_count(&self) -> usize {
        self.tables.read().map(|t| t.items.len()).unwrap_or(0)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
