//! Read access patterns over the item collection.

use crate::error::Result;
use crate::keys::{self, DEPENDENCY_SK_PREFIX, RECENT_PARTITION, TYPE_PARTITION, TYPE_SK_PREFIX};
use crate::model::{DependencyEdge, Node, NodeType, NodeWithType, ResolvedEdge};
use crate::store::{IndexName, ItemStore, QueryRequest};

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_LIST_LIMIT: usize = 100;

pub fn get_node(store: &dyn ItemStore, id: &str) -> Result<Option<Node>> {
    store
        .get_item(&keys::node_key(id))?
        .map(|item| Node::from_item(&item))
        .transpose()
}

/// Node plus its declared type; the type is `None` if it was deleted since.
pub fn get_node_with_type(store: &dyn ItemStore, id: &str) -> Result<Option<NodeWithType>> {
    let Some(node) = get_node(store, id)? else {
        return Ok(None);
    };
    let node_type = get_type(store, &node.type_id)?;
    let links = node.links();
    Ok(Some(NodeWithType {
        node,
        node_type,
        links,
    }))
}

/// Most recently ingested first.
pub fn list_recent_nodes(store: &dyn ItemStore, limit: usize) -> Result<Vec<Node>> {
    let request = QueryRequest::new(IndexName::Recent, RECENT_PARTITION)
        .descending()
        .with_limit(limit);
    store.query(&request)?.iter().map(Node::from_item).collect()
}

pub fn list_nodes_by_type(store: &dyn ItemStore, type_id: &str, limit: usize) -> Result<Vec<Node>> {
    let request =
        QueryRequest::new(IndexName::ByType, keys::type_index_key(type_id)).with_limit(limit);
    store.query(&request)?.iter().map(Node::from_item).collect()
}

/// Forward edges of `id`, each resolved to its dependency node.
pub fn get_dependencies(store: &dyn ItemStore, id: &str, limit: usize) -> Result<Vec<ResolvedEdge>> {
    let request = QueryRequest::new(IndexName::Primary, keys::qualify_node_id(id))
        .with_prefix(DEPENDENCY_SK_PREFIX)
        .with_limit(limit);
    let mut out = Vec::new();
    for item in store.query(&request)? {
        let edge = DependencyEdge::from_item(&item)?;
        let node = get_node(store, &edge.dependency_id)?;
        out.push(ResolvedEdge { edge, node });
    }
    Ok(out)
}

/// Reverse edges of `id` via the Inverse index, each resolved to its
/// dependant node.
pub fn get_dependants(store: &dyn ItemStore, id: &str, limit: usize) -> Result<Vec<ResolvedEdge>> {
    let request =
        QueryRequest::new(IndexName::Inverse, keys::dependency_sort_key(id)).with_limit(limit);
    let mut out = Vec::new();
    for item in store.query(&request)? {
        let edge = DependencyEdge::from_item(&item)?;
        let node = get_node(store, &edge.dependant_id)?;
        out.push(ResolvedEdge { edge, node });
    }
    Ok(out)
}

pub fn list_types(store: &dyn ItemStore) -> Result<Vec<NodeType>> {
    let request = QueryRequest::new(IndexName::Primary, TYPE_PARTITION).with_prefix(TYPE_SK_PREFIX);
    store.query(&request)?.iter().map(NodeType::from_item).collect()
}

pub fn get_type(store: &dyn ItemStore, id: &str) -> Result<Option<NodeType>> {
    store
        .get_item(&keys::type_key(id))?
        .map(|item| NodeType::from_item(&item))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AttributeValue, Item};
    use crate::keys::{ATTR_GSI1PK, ATTR_GSI1SK, ATTR_GSI2PK, ATTR_PK, ATTR_SK};
    use crate::model::{
        MetadataLink, ATTR_DEPENDANT_ID, ATTR_DEPENDANT_VERSION, ATTR_DEPENDENCY_ID, ATTR_ID, ATTR_METADATA,
        ATTR_NAME, ATTR_TYPE_ID, ATTR_VERSION,
    };
    use crate::store::MemoryStore;

    fn s(v: &str) -> AttributeValue {
        AttributeValue::from_string(v)
    }

    fn put_node(store: &MemoryStore, id: &str, type_id: &str, version: &str) {
        let key = keys::node_key(id);
        let recent = keys::recent_index_keys(version, id);
        let mut item = Item::new();
        item.insert(ATTR_PK.into(), s(&key.pk));
        item.insert(ATTR_SK.into(), s(&key.sk));
        item.insert(ATTR_GSI1PK.into(), s(&recent.pk));
        item.insert(ATTR_GSI1SK.into(), s(&recent.sk));
        item.insert(ATTR_GSI2PK.into(), s(&keys::type_index_key(type_id)));
        item.insert(ATTR_ID.into(), s(id));
        item.insert(ATTR_NAME.into(), s(id));
        item.insert(ATTR_TYPE_ID.into(), s(type_id));
        item.insert(ATTR_METADATA.into(), s("{}"));
        item.insert(ATTR_VERSION.into(), s(version));
        store.put_item(item).unwrap();
    }

    fn put_edge(store: &MemoryStore, from: &str, to: &str, version: &str) {
        let key = keys::edge_key(from, to);
        let mut item = Item::new();
        item.insert(ATTR_PK.into(), s(&key.pk));
        item.insert(ATTR_SK.into(), s(&key.sk));
        item.insert(ATTR_DEPENDANT_ID.into(), s(&keys::qualify_node_id(from)));
        item.insert(ATTR_DEPENDENCY_ID.into(), s(&keys::qualify_node_id(to)));
        item.insert(ATTR_DEPENDANT_VERSION.into(), s(version));
        store.put_item(item).unwrap();
    }

    #[test]
    fn test_missing_node_is_none() {
        let store = MemoryStore::new();
        assert!(get_node(&store, "ghost").unwrap().is_none());
        assert!(get_node_with_type(&store, "ghost").unwrap().is_none());
    }

    #[test]
    fn test_recent_and_by_type() {
        let store = MemoryStore::new();
        put_node(&store, "a", "lib", "v1");
        put_node(&store, "b", "svc", "v2");
        put_node(&store, "c", "lib", "v3");

        let recent: Vec<String> = list_recent_nodes(&store, 2)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(recent, vec!["c", "b"]);

        let libs: Vec<String> = list_nodes_by_type(&store, "lib", DEFAULT_LIST_LIMIT)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(libs, vec!["a", "c"]);
    }

    #[test]
    fn test_edges_resolve_or_null() {
        let store = MemoryStore::new();
        put_node(&store, "a", "lib", "v1");
        put_node(&store, "b", "lib", "v1");
        put_edge(&store, "a", "b", "v1");
        put_edge(&store, "a", "gone", "v1");

        let deps = get_dependencies(&store, "a", DEFAULT_LIST_LIMIT).unwrap();
        assert_eq!(deps.len(), 2);
        let resolved: Vec<(String, bool)> = deps
            .iter()
            .map(|e| (e.edge.dependency_id.clone(), e.node.is_some()))
            .collect();
        assert!(resolved.contains(&("b".to_string(), true)));
        assert!(resolved.contains(&("gone".to_string(), false)));

        let dependants = get_dependants(&store, "b", DEFAULT_LIST_LIMIT).unwrap();
        assert_eq!(dependants.len(), 1);
        assert_eq!(dependants[0].node.as_ref().map(|n| n.id.as_str()), Some("a"));
    }

    #[test]
    fn test_node_with_type() {
        let store = MemoryStore::new();
        store.put_item(NodeType::new("lib", "Library").to_item()).unwrap();
        put_node(&store, "a", "lib", "v1");
        let found = get_node_with_type(&store, "a").unwrap().unwrap();
        assert_eq!(found.node_type, Some(NodeType::new("lib", "Library")));
        assert!(found.links.is_empty());
        assert_eq!(list_types(&store).unwrap().len(), 1);
    }

    #[test]
    fn test_node_with_type_carries_links() {
        let store = MemoryStore::new();
        put_node(&store, "a", "lib", "v1");
        let mut item = store.get_item(&keys::node_key("a")).unwrap().unwrap();
        item.insert(
            ATTR_METADATA.into(),
            s(r#"{"repo":{"url":"https://git.example/a","name":"a"},"owner":"team-a"}"#),
        );
        store.put_item(item).unwrap();

        let found = get_node_with_type(&store, "a").unwrap().unwrap();
        assert_eq!(
            found.links,
            vec![MetadataLink {
                url: "https://git.example/a".to_string(),
                name: "a".to_string(),
            }]
        );
    }
}
