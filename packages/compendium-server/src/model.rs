//! Domain entities and their stored item form.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::codec::{AttributeValue, Item};
use crate::error::{CompendiumError, Result};
use crate::keys::{self, ATTR_PK, ATTR_SK};

pub const ATTR_ID: &str = "id";
pub const ATTR_NAME: &str = "name";
pub const ATTR_TYPE_ID: &str = "typeId";
pub const ATTR_METADATA: &str = "metadata";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_DEPENDANT_ID: &str = "dependantId";
pub const ATTR_DEPENDENCY_ID: &str = "dependencyId";
pub const ATTR_DEPENDANT_VERSION: &str = "dependantVersion";

/// A versioned entity in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub type_id: String,
    pub metadata: Json,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
    pub id: String,
    pub name: String,
}

/// "dependant depends on dependency, as asserted by dependant at version".
/// Ids are held unqualified; the stored attributes carry the `NODE|` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub dependant_id: String,
    pub dependency_id: String,
    pub dependant_version: String,
}

/// An edge with the node on its far side, `None` when that node is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEdge {
    pub edge: DependencyEdge,
    pub node: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeWithType {
    pub node: Node,
    pub node_type: Option<NodeType>,
    /// Link-shaped entries found in the node's metadata.
    #[serde(default)]
    pub links: Vec<MetadataLink>,
}

/// The reserved `{url, name}` metadata shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLink {
    pub url: String,
    pub name: String,
}

/// One node of an ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    pub id: String,
    pub name: String,
    pub type_id: String,
    #[serde(default = "empty_metadata")]
    pub metadata: Json,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn empty_metadata() -> Json {
    Json::Object(serde_json::Map::new())
}

impl NodeInput {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            type_id: type_id.into(),
            metadata: empty_metadata(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Json) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Declared dependencies with repeats removed, first occurrence wins.
    pub fn unique_dependencies(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| seen.insert(*d))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
    pub nodes: Vec<NodeInput>,
}

impl IngestBatch {
    pub fn new(nodes: Vec<NodeInput>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn required_s<'a>(item: &'a Item, attr: &str) -> Result<&'a str> {
    item.get(attr).and_then(AttributeValue::as_s).ok_or_else(|| {
        CompendiumError::invalid_input(format!("item is missing string attribute '{attr}'"))
    })
}

fn unqualified(item: &Item, attr: &str) -> Result<String> {
    let qualified = required_s(item, attr)?;
    keys::unqualify_node_id(qualified)
        .map(str::to_string)
        .ok_or_else(|| {
            CompendiumError::invalid_input(format!("'{attr}' is not a node reference: {qualified}"))
        })
}

impl Node {
    /// Decode a stored node item. Metadata is stored as JSON text.
    pub fn from_item(item: &Item) -> Result<Self> {
        let metadata = match item.get(ATTR_METADATA) {
            Some(AttributeValue::S(text)) => serde_json::from_str(text)?,
            Some(_) => {
                return Err(CompendiumError::invalid_input(
                    "node metadata is not stored as JSON text",
                ))
            }
            None => empty_metadata(),
        };
        Ok(Self {
            id: required_s(item, ATTR_ID)?.to_string(),
            name: required_s(item, ATTR_NAME)?.to_string(),
            type_id: required_s(item, ATTR_TYPE_ID)?.to_string(),
            metadata,
            version: required_s(item, ATTR_VERSION)?.to_string(),
        })
    }

    /// Link-shaped metadata: top-level object values and `links` array
    /// entries that carry string `url` and `name` fields.
    pub fn links(&self) -> Vec<MetadataLink> {
        let Json::Object(map) = &self.metadata else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (key, value) in map {
            match value {
                Json::Array(entries) if key == "links" => {
                    out.extend(entries.iter().filter_map(as_link));
                }
                other => out.extend(as_link(other)),
            }
        }
        out
    }
}

fn as_link(value: &Json) -> Option<MetadataLink> {
    let url = value.get("url")?.as_str()?;
    let name = value.get("name")?.as_str()?;
    Some(MetadataLink {
        url: url.to_string(),
        name: name.to_string(),
    })
}

impl NodeType {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn to_item(&self) -> Item {
        let key = keys::type_key(&self.id);
        let mut item = Item::new();
        item.insert(ATTR_PK.into(), AttributeValue::from_string(key.pk));
        item.insert(ATTR_SK.into(), AttributeValue::from_string(key.sk));
        item.insert(ATTR_ID.into(), AttributeValue::from_string(self.id.as_str()));
        item.insert(ATTR_NAME.into(), AttributeValue::from_string(self.name.as_str()));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self> {
        Ok(Self {
            id: required_s(item, ATTR_ID)?.to_string(),
            name: required_s(item, ATTR_NAME)?.to_string(),
        })
    }
}

impl DependencyEdge {
    pub fn from_item(item: &Item) -> Result<Self> {
        Ok(Self {
            dependant_id: unqualified(item, ATTR_DEPENDANT_ID)?,
            dependency_id: unqualified(item, ATTR_DEPENDENCY_ID)?,
            dependant_version: required_s(item, ATTR_DEPENDANT_VERSION)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_item(metadata: &str) -> Item {
        let mut item = Item::new();
        item.insert(ATTR_ID.into(), AttributeValue::from_string("n1"));
        item.insert(ATTR_NAME.into(), AttributeValue::from_string("Node One"));
        item.insert(ATTR_TYPE_ID.into(), AttributeValue::from_string("service"));
        item.insert(ATTR_METADATA.into(), AttributeValue::from_string(metadata));
        item.insert(ATTR_VERSION.into(), AttributeValue::from_string("v1"));
        item
    }

    #[test]
    fn test_node_from_item_parses_metadata() {
        let node = Node::from_item(&node_item(r#"{"team":"core","replicas":3}"#)).unwrap();
        assert_eq!(node.id, "n1");
        assert_eq!(node.type_id, "service");
        assert_eq!(node.metadata, json!({"team": "core", "replicas": 3}));
    }

    #[test]
    fn test_node_from_item_rejects_missing_attribute() {
        let mut item = node_item("{}");
        item.remove(ATTR_TYPE_ID);
        let err = Node::from_item(&item).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_links() {
        let mut node = Node::from_item(&node_item("{}")).unwrap();
        node.metadata = json!({
            "repo": {"url": "https://git.example/n1", "name": "source"},
            "links": [
                {"url": "https://docs.example", "name": "docs"},
                {"url": "https://bad.example"}
            ],
            "owner": "team-a"
        });
        let links = node.links();
        assert_eq!(links.len(), 2);
        assert!(links.contains(&MetadataLink {
            url: "https://git.example/n1".into(),
            name: "source".into()
        }));
        assert!(links.iter().any(|l| l.name == "docs"));
    }

    #[test]
    fn test_node_input_defaults() {
        let input: NodeInput =
            serde_json::from_value(json!({"id": "n1", "name": "n1", "typeId": "lib"})).unwrap();
        assert_eq!(input.metadata, json!({}));
        assert!(input.dependencies.is_empty());
    }

    #[test]
    fn test_unique_dependencies_keeps_first_occurrence() {
        let input = NodeInput::new("n1", "lib").with_dependencies(["b", "a", "b", "c", "a"]);
        assert_eq!(input.unique_dependencies(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_edge_from_item_unqualifies_ids() {
        let mut item = Item::new();
        item.insert(ATTR_DEPENDANT_ID.into(), AttributeValue::from_string("NODE|n1"));
        item.insert(ATTR_DEPENDENCY_ID.into(), AttributeValue::from_string("NODE|n2"));
        item.insert(ATTR_DEPENDANT_VERSION.into(), AttributeValue::from_string("v1"));
        let edge = DependencyEdge::from_item(&item).unwrap();
        assert_eq!(edge.dependant_id, "n1");
        assert_eq!(edge.dependency_id, "n2");

        item.insert(ATTR_DEPENDENCY_ID.into(), AttributeValue::from_string("n2"));
        assert!(DependencyEdge::from_item(&item).is_err());
    }

    #[test]
    fn test_type_item_round_trip() {
        let ty = NodeType::new("service", "Service");
        let item = ty.to_item();
        assert_eq!(item.get("PK").and_then(AttributeValue::as_s), Some("TYPE"));
        assert_eq!(NodeType::from_item(&item).unwrap(), ty);
    }
}
