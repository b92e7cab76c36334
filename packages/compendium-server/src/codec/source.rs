//! Attribute sources: a literal value, or a path reference into the
//! JSON context of the step being executed (`$.node.id`, `$.PK`, ...).

use serde_json::Value as Json;

use super::attribute::{AttributeValue, Value};
use crate::error::{CompendiumError, Result};

/// Root marker every path reference must start with.
pub const PATH_ROOT: &str = "$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    String,
    Number,
    Bool,
    Map,
    List,
    /// Any JSON value, stored as its serialized text.
    JsonString,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeSource {
    Literal(AttributeValue),
    Path { path: String, kind: PathKind },
}

impl AttributeSource {
    pub fn literal(value: AttributeValue) -> Self {
        AttributeSource::Literal(value)
    }

    pub fn string_from_path(path: &str) -> Result<Self> {
        Self::from_path(path, PathKind::String)
    }

    pub fn number_from_path(path: &str) -> Result<Self> {
        Self::from_path(path, PathKind::Number)
    }

    pub fn bool_from_path(path: &str) -> Result<Self> {
        Self::from_path(path, PathKind::Bool)
    }

    pub fn map_from_path(path: &str) -> Result<Self> {
        Self::from_path(path, PathKind::Map)
    }

    pub fn list_from_path(path: &str) -> Result<Self> {
        Self::from_path(path, PathKind::List)
    }

    pub fn json_string_from_path(path: &str) -> Result<Self> {
        Self::from_path(path, PathKind::JsonString)
    }

    fn from_path(path: &str, kind: PathKind) -> Result<Self> {
        validate_path(path)?;
        Ok(AttributeSource::Path {
            path: path.to_string(),
            kind,
        })
    }

    /// Produce the wire value, reading path references from `context`.
    pub fn resolve(&self, context: &Json) -> Result<AttributeValue> {
        let (path, kind) = match self {
            AttributeSource::Literal(value) => return Ok(value.clone()),
            AttributeSource::Path { path, kind } => (path, *kind),
        };
        let found = lookup(context, path)?;
        let mismatch = || {
            CompendiumError::invalid_input(format!("value at '{path}' is not a {kind:?}"))
        };
        match kind {
            PathKind::String => found
                .as_str()
                .map(AttributeValue::from_string)
                .ok_or_else(mismatch),
            PathKind::Number => match found {
                Json::Number(n) => Ok(AttributeValue::from_number(n.clone())),
                Json::String(s) => s
                    .parse::<serde_json::Number>()
                    .map(AttributeValue::from_number)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            PathKind::Bool => found.as_bool().map(AttributeValue::from_bool).ok_or_else(mismatch),
            PathKind::Map => match Value::from(found.clone()) {
                Value::Map(map) => Ok(AttributeValue::from_map(map)),
                _ => Err(mismatch()),
            },
            PathKind::List => match Value::from(found.clone()) {
                Value::List(items) => Ok(AttributeValue::from_list(items)),
                _ => Err(mismatch()),
            },
            PathKind::JsonString => Ok(AttributeValue::from_string(serde_json::to_string(found)?)),
        }
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path == PATH_ROOT || path.starts_with("$.") {
        Ok(())
    } else {
        Err(CompendiumError::InvalidPath(format!(
            "'{path}' must be exactly '$' or start with '$.'"
        )))
    }
}

/// Walk a dotted path. Numeric segments index into arrays.
fn lookup<'a>(context: &'a Json, path: &str) -> Result<&'a Json> {
    validate_path(path)?;
    let mut current = context;
    let rest = path.strip_prefix("$.").unwrap_or("");
    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        let next = match current {
            Json::Object(map) => map.get(segment),
            Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            CompendiumError::InvalidPath(format!("'{path}' does not resolve (at '{segment}')"))
        })?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Json {
        json!({
            "node": {
                "id": "n1",
                "weight": 3,
                "enabled": true,
                "metadata": {"url": "https://x", "name": "docs"},
                "dependencies": ["n2", "n3"]
            }
        })
    }

    #[test]
    fn test_path_must_start_with_root() {
        let err = AttributeSource::string_from_path("node.id").unwrap_err();
        assert_eq!(err.code(), "INVALID_PATH");
        assert!(AttributeSource::string_from_path("$").is_ok());
        assert!(AttributeSource::string_from_path("$.node.id").is_ok());
        assert!(AttributeSource::string_from_path("$node").is_err());
    }

    #[test]
    fn test_resolve_kinds() {
        let ctx = context();
        let s = AttributeSource::string_from_path("$.node.id").unwrap();
        assert_eq!(s.resolve(&ctx).unwrap(), AttributeValue::S("n1".into()));

        let n = AttributeSource::number_from_path("$.node.weight").unwrap();
        assert_eq!(n.resolve(&ctx).unwrap(), AttributeValue::N("3".into()));

        let b = AttributeSource::bool_from_path("$.node.enabled").unwrap();
        assert_eq!(b.resolve(&ctx).unwrap(), AttributeValue::Bool(true));

        let first_dep = AttributeSource::string_from_path("$.node.dependencies.1").unwrap();
        assert_eq!(first_dep.resolve(&ctx).unwrap(), AttributeValue::S("n3".into()));

        let list = AttributeSource::list_from_path("$.node.dependencies").unwrap();
        assert_eq!(
            list.resolve(&ctx).unwrap(),
            AttributeValue::L(vec![AttributeValue::S("n2".into()), AttributeValue::S("n3".into())])
        );

        let meta = AttributeSource::json_string_from_path("$.node.metadata").unwrap();
        assert_eq!(
            meta.resolve(&ctx).unwrap(),
            AttributeValue::S(r#"{"name":"docs","url":"https://x"}"#.into())
        );
    }

    #[test]
    fn test_missing_path_and_kind_mismatch() {
        let ctx = context();
        let missing = AttributeSource::string_from_path("$.node.nope").unwrap();
        assert_eq!(missing.resolve(&ctx).unwrap_err().code(), "INVALID_PATH");

        let wrong = AttributeSource::string_from_path("$.node.weight").unwrap();
        assert_eq!(wrong.resolve(&ctx).unwrap_err().code(), "INVALID_INPUT");
    }

    #[test]
    fn test_literal_ignores_context() {
        let lit = AttributeSource::literal(AttributeValue::from_string("NODES|RECENT"));
        assert_eq!(lit.resolve(&Json::Null).unwrap(), AttributeValue::S("NODES|RECENT".into()));
    }
}
