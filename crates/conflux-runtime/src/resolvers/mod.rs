//! Built-in resolvers.

mod basic;
mod collection;
mod control;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ResolverError;
use crate::registry::Resolver;

pub(crate) fn register_builtins(registry: &mut HashMap<String, Arc<dyn Resolver>>) {
  registry.insert("Echo".to_string(), Arc::new(basic::Echo));
  registry.insert("Noop".to_string(), Arc::new(basic::Noop));
  registry.insert("ThrowError".to_string(), Arc::new(basic::ThrowError));
  registry.insert("Conditional".to_string(), Arc::new(basic::Conditional));
  registry.insert("Wait".to_string(), Arc::new(basic::Wait));
  registry.insert("SubFlow".to_string(), Arc::new(control::SubFlow));
  registry.insert("Loop".to_string(), Arc::new(control::Loop));
  registry.insert("Stop".to_string(), Arc::new(control::Stop));
  registry.insert("Repeater".to_string(), Arc::new(collection::Repeater));
  registry.insert("ArrayMap".to_string(), Arc::new(collection::ArrayMap));
}

/// Truthiness as flow authors expect it from JSON: null, false, zero, and
/// the empty string are false.
pub(crate) fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

pub(crate) fn required_str<'a>(
  resolver: &str,
  params: &'a Value,
  key: &str,
) -> Result<&'a str, ResolverError> {
  params
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| ResolverError::invalid_params(resolver, format!("'{}' must be a non-empty string", key)))
}

pub(crate) fn flag(params: &Value, key: &str) -> bool {
  params.get(key).is_some_and(truthy)
}
