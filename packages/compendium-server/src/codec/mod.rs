//! Attribute codec: domain values <-> the item store's typed attribute form.

pub mod attribute;
pub mod source;

pub use attribute::{decode, encode, item_to_json, AttributeValue, Item, NumberSet, Value};
pub use source::{AttributeSource, PathKind, PATH_ROOT};
