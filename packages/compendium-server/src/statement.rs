//! Parameterized select statements for stale-edge discovery.
//!
//! Identifiers that end up inside the statement text are validated, never
//! escaped; the cutoff version is always a bound parameter. Alongside the text
//! every statement carries a structured [`Predicate`] so an in-process store
//! can evaluate it without parsing.

use crate::codec::{AttributeValue, Item};
use crate::error::{CompendiumError, Result};
use crate::keys::{self, ATTR_PK, ATTR_SK, DEPENDENCY_SK_PREFIX};

pub const VERSION_ATTRIBUTE: &str = "dependantVersion";

const TABLE_NAME_MIN: usize = 3;
const TABLE_NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub partition: String,
    pub sort_prefix: String,
    pub attribute: String,
    pub comparison: Comparison,
    /// Index into [`Statement::parameters`].
    pub parameter: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub parameters: Vec<AttributeValue>,
    pub predicate: Predicate,
}

impl Statement {
    /// Whether `item` satisfies the predicate with the bound parameters.
    ///
    /// Items missing the compared attribute, or holding it as a non-string,
    /// never match.
    pub fn matches(&self, item: &Item) -> Result<bool> {
        let p = &self.predicate;
        let bound = self
            .parameters
            .get(p.parameter)
            .and_then(AttributeValue::as_s)
            .ok_or_else(|| {
                CompendiumError::invalid_input(format!(
                    "statement parameter {} is not bound to a string",
                    p.parameter
                ))
            })?;

        let pk = item.get(ATTR_PK).and_then(AttributeValue::as_s);
        let sk = item.get(ATTR_SK).and_then(AttributeValue::as_s);
        if pk != Some(p.partition.as_str()) {
            return Ok(false);
        }
        if !sk.is_some_and(|sk| sk.starts_with(&p.sort_prefix)) {
            return Ok(false);
        }
        let Some(value) = item.get(&p.attribute).and_then(AttributeValue::as_s) else {
            return Ok(false);
        };
        Ok(match p.comparison {
            Comparison::LessThan => value < bound,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StatementBuilder {
    table_name: String,
}

impl StatementBuilder {
    pub fn new(table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        validate_table_name(&table_name)?;
        Ok(Self { table_name })
    }

    /// Edges under `NODE|{dependant_id}` whose `dependantVersion` sorts
    /// strictly before `cutoff`.
    pub fn stale_edges(&self, dependant_id: &str, cutoff: &str) -> Result<Statement> {
        validate_identifier(dependant_id)?;
        let partition = keys::qualify_node_id(dependant_id);
        let text = format!(
            "SELECT * FROM \"{table}\" WHERE {ATTR_PK} = '{partition}' \
             AND begins_with({ATTR_SK}, '{DEPENDENCY_SK_PREFIX}') \
             AND {VERSION_ATTRIBUTE} < ?",
            table = self.table_name,
        );
        Ok(Statement {
            text,
            parameters: vec![AttributeValue::from_string(cutoff)],
            predicate: Predicate {
                partition,
                sort_prefix: DEPENDENCY_SK_PREFIX.to_string(),
                attribute: VERSION_ATTRIBUTE.to_string(),
                comparison: Comparison::LessThan,
                parameter: 0,
            },
        })
    }
}

pub fn validate_table_name(name: &str) -> Result<()> {
    let len_ok = (TABLE_NAME_MIN..=TABLE_NAME_MAX).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(CompendiumError::InvalidIdentifier(format!(
            "table name '{name}' must be 3-255 characters of [A-Za-z0-9_.-]"
        )))
    }
}

/// Node ids are opaque, but must be non-empty and free of quotes and
/// control characters.
pub fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CompendiumError::InvalidIdentifier("empty node id".to_string()));
    }
    if let Some(bad) = id
        .chars()
        .find(|&c| matches!(c, '\'' | '"') || c.is_control())
    {
        return Err(CompendiumError::InvalidIdentifier(format!(
            "node id {id:?} contains forbidden character {bad:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_item(dependant: &str, dependency: &str, version: &str) -> Item {
        let key = keys::edge_key(dependant, dependency);
        let mut item = Item::new();
        item.insert(ATTR_PK.into(), AttributeValue::from_string(key.pk));
        item.insert(ATTR_SK.into(), AttributeValue::from_string(key.sk));
        item.insert(VERSION_ATTRIBUTE.into(), AttributeValue::from_string(version));
        item
    }

    #[test]
    fn test_statement_text_and_parameter() {
        let builder = StatementBuilder::new("compendium").unwrap();
        let stmt = builder.stale_edges("n1", "2024-01-02T00:00:00.000Z").unwrap();
        assert_eq!(
            stmt.text,
            "SELECT * FROM \"compendium\" WHERE PK = 'NODE|n1' \
             AND begins_with(SK, 'DEPENDENCY|NODE|') AND dependantVersion < ?"
        );
        assert_eq!(
            stmt.parameters,
            vec![AttributeValue::S("2024-01-02T00:00:00.000Z".into())]
        );
        assert!(!stmt.text.contains("2024"));
    }

    #[test]
    fn test_rejects_quote_bearing_ids() {
        let builder = StatementBuilder::new("compendium").unwrap();
        for id in ["n1' OR '1'='1", "a\"b", "", "line\nbreak"] {
            let err = builder.stale_edges(id, "v").unwrap_err();
            assert_eq!(err.code(), "INVALID_IDENTIFIER", "id {id:?}");
        }
        assert!(builder.stale_edges("pkg:npm/@scope/name|1.0", "v").is_ok());
    }

    #[test]
    fn test_rejects_bad_table_names() {
        for name in ["ab", "my table", "t\"x", "drop;--", &"x".repeat(256)] {
            assert!(StatementBuilder::new(name).is_err(), "name {name:?}");
        }
        assert!(StatementBuilder::new("prod-compendium.v2_table").is_ok());
    }

    #[test]
    fn test_predicate_matches_only_older_edges_in_partition() {
        let builder = StatementBuilder::new("compendium").unwrap();
        let stmt = builder.stale_edges("n1", "2024-01-02").unwrap();

        assert!(stmt.matches(&edge_item("n1", "n2", "2024-01-01")).unwrap());
        assert!(!stmt.matches(&edge_item("n1", "n3", "2024-01-02")).unwrap());
        assert!(!stmt.matches(&edge_item("n9", "n2", "2024-01-01")).unwrap());

        // the node item shares the partition but not the sort prefix
        let node_key = keys::node_key("n1");
        let mut node = Item::new();
        node.insert(ATTR_PK.into(), AttributeValue::from_string(node_key.pk));
        node.insert(ATTR_SK.into(), AttributeValue::from_string(node_key.sk));
        node.insert(VERSION_ATTRIBUTE.into(), AttributeValue::from_string("0"));
        assert!(!stmt.matches(&node).unwrap());
    }
}
