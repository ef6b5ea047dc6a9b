//! Result remapping.
//!
//! Applies a [`ResultMap`] to a resolver's output:
//!
//! ```json
//! data:   { "out": "x", "meta": { "ts": 1, "extra": true }, "dropped": 0 }
//! map:    { "out": "greeting", "meta": { "ts": "timestamp" } }
//! result: { "greeting": "x", "meta": { "timestamp": 1 } }
//! ```
//!
//! Keys absent from the map are dropped. Keys declared in the map but absent
//! from the data are omitted.

use conflux_config::{ResultKey, ResultMap};
use serde_json::{Map, Value};

/// Rename `data`'s keys according to `map`. Non-object data yields `{}`.
pub fn remap(data: &Value, map: &ResultMap) -> Value {
  match data.as_object() {
    Some(source) => Value::Object(remap_object(source, map)),
    None => Value::Object(Map::new()),
  }
}

fn remap_object(source: &Map<String, Value>, map: &ResultMap) -> Map<String, Value> {
  let mut out = Map::new();

  for (key, target) in map {
    let Some(value) = source.get(key) else {
      continue;
    };

    match target {
      ResultKey::Rename(new_key) => {
        out.insert(new_key.clone(), value.clone());
      }
      ResultKey::Nested(inner) => {
        if let Some(nested) = value.as_object() {
          out.insert(key.clone(), Value::Object(remap_object(nested, inner)));
        }
      }
    }
  }

  out
}
