use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declarative key-rename map applied to a resolver's output.
///
/// Keys name fields of the output. A [`ResultKey::Rename`] value gives the new
/// field name; a [`ResultKey::Nested`] value keeps the field name and renames
/// inside it.
///
/// ```json
/// { "out": "greeting", "meta": { "ts": "timestamp" } }
/// ```
pub type ResultMap = BTreeMap<String, ResultKey>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultKey {
  Rename(String),
  Nested(ResultMap),
}

impl From<&str> for ResultKey {
  fn from(value: &str) -> Self {
    ResultKey::Rename(value.to_string())
  }
}

impl From<ResultMap> for ResultKey {
  fn from(value: ResultMap) -> Self {
    ResultKey::Nested(value)
  }
}
