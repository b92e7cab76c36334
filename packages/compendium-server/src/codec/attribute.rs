//! Typed attribute values and the domain values they encode.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::{CompendiumError, Result};

/// One stored item: attribute name -> typed attribute value.
pub type Item = BTreeMap<String, AttributeValue>;

/// Store wire representation of a single attribute.
///
/// Serializes to the tagged form the item store speaks, e.g. `{"S":"x"}`,
/// `{"N":"1.5"}`, `{"NULL":true}`. Numbers travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "B")]
    B(Vec<u8>),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    #[serde(rename = "BS")]
    Bs(Vec<Vec<u8>>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "BOOL")]
    Bool(bool),
}

impl AttributeValue {
    pub fn from_string(value: impl Into<String>) -> Self {
        AttributeValue::S(value.into())
    }

    pub fn from_number(value: impl Into<Number>) -> Self {
        AttributeValue::N(value.into().to_string())
    }

    pub fn from_binary(value: impl Into<Vec<u8>>) -> Self {
        AttributeValue::B(value.into())
    }

    pub fn from_string_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        AttributeValue::Ss(set.into_iter().collect())
    }

    /// Number sets keep first-seen order; duplicates (by decimal form) are dropped.
    pub fn from_number_set<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Number>,
    {
        let set: NumberSet = values.into_iter().collect();
        AttributeValue::Ns(set.iter().map(Number::to_string).collect())
    }

    pub fn from_binary_set<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let set: BTreeSet<Vec<u8>> = values.into_iter().collect();
        AttributeValue::Bs(set.into_iter().collect())
    }

    /// Recursively encodes every nested value.
    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        AttributeValue::M(
            values
                .iter()
                .map(|(k, v)| (k.clone(), encode(v)))
                .collect(),
        )
    }

    pub fn from_list(values: Vec<Value>) -> Self {
        AttributeValue::L(values.iter().map(encode).collect())
    }

    pub fn from_null() -> Self {
        AttributeValue::Null(true)
    }

    pub fn from_bool(value: bool) -> Self {
        AttributeValue::Bool(value)
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Numbers without repeats, in first-seen order. Two numbers are the same
/// member when their decimal forms are equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberSet(Vec<Number>);

impl NumberSet {
    pub fn iter(&self) -> std::slice::Iter<'_, Number> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Number> for NumberSet {
    fn from_iter<I: IntoIterator<Item = Number>>(values: I) -> Self {
        let mut seen = BTreeSet::new();
        NumberSet(
            values
                .into_iter()
                .filter(|n| seen.insert(n.to_string()))
                .collect(),
        )
    }
}

/// Domain value, the decoded counterpart of [`AttributeValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(Number),
    Binary(Vec<u8>),
    StringSet(BTreeSet<String>),
    NumberSet(NumberSet),
    BinarySet(BTreeSet<Vec<u8>>),
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
    Null,
    Bool(bool),
}

/// Encode a domain value into its wire form.
pub fn encode(value: &Value) -> AttributeValue {
    match value {
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::Binary(b) => AttributeValue::B(b.clone()),
        Value::StringSet(set) => AttributeValue::Ss(set.iter().cloned().collect()),
        Value::NumberSet(set) => AttributeValue::Ns(set.iter().map(Number::to_string).collect()),
        Value::BinarySet(set) => AttributeValue::Bs(set.iter().cloned().collect()),
        Value::Map(map) => AttributeValue::from_map(map.clone()),
        Value::List(items) => AttributeValue::L(items.iter().map(encode).collect()),
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
    }
}

/// Decode a wire value. Fails only on number strings that do not parse.
pub fn decode(value: &AttributeValue) -> Result<Value> {
    Ok(match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => Value::Number(parse_number(n)?),
        AttributeValue::B(b) => Value::Binary(b.clone()),
        AttributeValue::Ss(set) => Value::StringSet(set.iter().cloned().collect()),
        AttributeValue::Ns(set) => Value::NumberSet(
            set.iter()
                .map(|n| parse_number(n))
                .collect::<Result<NumberSet>>()?,
        ),
        AttributeValue::Bs(set) => Value::BinarySet(set.iter().cloned().collect()),
        AttributeValue::M(map) => Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), decode(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        ),
        AttributeValue::L(items) => {
            Value::List(items.iter().map(decode).collect::<Result<Vec<_>>>()?)
        }
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
    })
}

fn parse_number(text: &str) -> Result<Number> {
    text.parse::<Number>()
        .map_err(|e| CompendiumError::invalid_input(format!("bad number '{text}': {e}")))
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Value {
    /// Render as JSON. Binary becomes an array of byte values and sets become arrays.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Number(n) => Json::Number(n.clone()),
            Value::Binary(b) => bytes_to_json(b),
            Value::StringSet(set) => Json::Array(set.iter().cloned().map(Json::String).collect()),
            Value::NumberSet(set) => Json::Array(set.iter().cloned().map(Json::Number).collect()),
            Value::BinarySet(set) => Json::Array(set.iter().map(|b| bytes_to_json(b)).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
        }
    }
}

fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::Value::Array(
        bytes
            .iter()
            .map(|b| serde_json::Value::Number(Number::from(*b)))
            .collect(),
    )
}

/// Render a stored item as a plain JSON object with decoded attribute values.
pub fn item_to_json(item: &Item) -> Result<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for (name, value) in item {
        out.insert(name.clone(), decode(value)?.to_json());
    }
    Ok(serde_json::Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::String("hello".to_string()),
            Value::Number(Number::from(42)),
            Value::Number(Number::from(-7i64)),
            Value::Number(Number::from_f64(1.25).unwrap()),
            Value::Binary(vec![0, 1, 255]),
            Value::StringSet(["a", "b"].iter().map(|s| s.to_string()).collect()),
            Value::NumberSet([Number::from(3), Number::from_f64(0.5).unwrap()].into_iter().collect()),
            Value::BinarySet([vec![1u8], vec![2u8, 3]].into_iter().collect()),
            Value::List(vec![Value::Null, Value::Bool(true)]),
            Value::Map(
                [("k".to_string(), Value::List(vec![Value::String("v".into())]))]
                    .into_iter()
                    .collect(),
            ),
            Value::Null,
            Value::Bool(false),
        ]
    }

    #[test]
    fn test_round_trip_every_kind() {
        for value in sample_values() {
            let encoded = encode(&value);
            assert_eq!(decode(&encoded).unwrap(), value, "kind {:?}", encoded);
        }
    }

    #[test]
    fn test_numbers_are_decimal_strings_on_the_wire() {
        assert_eq!(AttributeValue::from_number(12), AttributeValue::N("12".to_string()));
        let wire = serde_json::to_value(AttributeValue::from_number(Number::from_f64(2.5).unwrap()))
            .unwrap();
        assert_eq!(wire, json!({"N": "2.5"}));
    }

    #[test]
    fn test_wire_tags() {
        assert_eq!(serde_json::to_value(AttributeValue::from_string("x")).unwrap(), json!({"S": "x"}));
        assert_eq!(serde_json::to_value(AttributeValue::from_null()).unwrap(), json!({"NULL": true}));
        assert_eq!(serde_json::to_value(AttributeValue::from_bool(true)).unwrap(), json!({"BOOL": true}));
        let list = AttributeValue::from_list(vec![Value::String("a".into())]);
        assert_eq!(serde_json::to_value(list).unwrap(), json!({"L": [{"S": "a"}]}));
    }

    #[test]
    fn test_from_map_encodes_nested_values() {
        let nested: BTreeMap<String, Value> = [(
            "inner".to_string(),
            Value::Map([("n".to_string(), Value::Number(Number::from(1)))].into_iter().collect()),
        )]
        .into_iter()
        .collect();
        let encoded = AttributeValue::from_map(nested);
        let wire = serde_json::to_value(&encoded).unwrap();
        assert_eq!(wire, json!({"M": {"inner": {"M": {"n": {"N": "1"}}}}}));
    }

    #[test]
    fn test_number_set_dedup_keeps_order() {
        let set = AttributeValue::from_number_set(vec![Number::from(3), Number::from(1), Number::from(3)]);
        assert_eq!(set, AttributeValue::Ns(vec!["3".to_string(), "1".to_string()]));
    }

    #[test]
    fn test_number_set_round_trips_with_repeated_input() {
        let value = Value::NumberSet(
            [Number::from(1), Number::from(1), Number::from(2)].into_iter().collect(),
        );
        match &value {
            Value::NumberSet(set) => assert_eq!(set.len(), 2),
            other => panic!("Expected NumberSet, got {other:?}"),
        }
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_decode_rejects_bad_number() {
        let err = decode(&AttributeValue::N("twelve".to_string())).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_json_bridge() {
        let json = json!({"url": "https://example.com", "tags": ["a", 1, null]});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_item_to_json() {
        let mut item = Item::new();
        item.insert("PK".to_string(), AttributeValue::from_string("NODE|a"));
        item.insert("count".to_string(), AttributeValue::from_number(2));
        assert_eq!(item_to_json(&item).unwrap(), json!({"PK": "NODE|a", "count": 2}));
    }
}
