//! Parameter materialization using minijinja templates.
//!
//! A `transform` block is a JSON structure whose string leaves are templates
//! rendered against a dataset. Objects and arrays keep their shape.
//!
//! # Typed expressions
//! A string that is exactly one expression keeps the expression's type:
//! ```json
//! { "years": "{{ age }}", "double": "{{ flow.properties.item * 2 }}" }
//! ```
//! renders to `{ "years": 30, "double": 4 }`. Any other string containing
//! template syntax renders to text:
//! ```json
//! { "greeting": "Hello {{ name | title }}!" }
//! ```
//!
//! # Dataset aliases
//! Identifiers cannot start with `$` in minijinja, so a top-level `$flow`
//! entry is also exposed as `flow`.

use minijinja::Environment;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::TemplateError;

const FLOW_KEY: &str = "$flow";
const FLOW_ALIAS: &str = "flow";
const TRANSFORM_KEY: &str = "transform";

/// Renders transform blocks against a dataset.
pub struct TemplateEngine {
  env: Environment<'static>,
}

impl Default for TemplateEngine {
  fn default() -> Self {
    Self::new()
  }
}

impl TemplateEngine {
  pub fn new() -> Self {
    Self {
      env: Environment::new(),
    }
  }

  /// Render every string leaf of `spec` against `dataset`.
  pub fn transform(&self, dataset: &Value, spec: &Value) -> Result<Value, TemplateError> {
    let context = template_context(dataset);
    self.render_value(spec, &context)
  }

  fn render_value(&self, spec: &Value, context: &Value) -> Result<Value, TemplateError> {
    match spec {
      Value::String(template) => self.render_string(template, context),
      Value::Array(items) => items
        .iter()
        .map(|item| self.render_value(item, context))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array),
      Value::Object(fields) => {
        let mut out = Map::with_capacity(fields.len());
        for (key, value) in fields {
          out.insert(key.clone(), self.render_value(value, context)?);
        }
        Ok(Value::Object(out))
      }
      other => Ok(other.clone()),
    }
  }

  fn render_string(&self, template: &str, context: &Value) -> Result<Value, TemplateError> {
    if let Some(expr) = single_expression(template) {
      let compiled = self
        .env
        .compile_expression(expr)
        .map_err(|e| render_error(template, e))?;
      let value = compiled.eval(context).map_err(|e| render_error(template, e))?;
      return serde_json::to_value(&value).map_err(|e| TemplateError::Conversion {
        template: template.to_string(),
        message: e.to_string(),
      });
    }

    if !template.contains("{{") && !template.contains("{%") {
      return Ok(Value::String(template.to_string()));
    }

    self
      .env
      .render_str(template, context)
      .map(Value::String)
      .map_err(|e| render_error(template, e))
  }
}

/// Combine static params with a dataset.
///
/// When `params` holds a `transform` object, the dataset is extended with
/// the remaining params and the transform is rendered against it; the
/// rendered transform alone is the result. Otherwise params are merged over
/// the dataset as-is.
pub fn materialize(
  engine: &TemplateEngine,
  params: &Value,
  dataset: Value,
) -> Result<Value, TemplateError> {
  let mut merged = match dataset {
    Value::Object(map) => map,
    _ => Map::new(),
  };

  let Some(params) = params.as_object() else {
    return Ok(Value::Object(merged));
  };

  match params.get(TRANSFORM_KEY) {
    Some(transform @ Value::Object(_)) => {
      for (key, value) in params {
        if key != TRANSFORM_KEY {
          merged.insert(key.clone(), value.clone());
        }
      }
      debug!(keys = ?transform.as_object().map(|t| t.len()), "rendering transform block");
      engine.transform(&Value::Object(merged), transform)
    }
    _ => {
      for (key, value) in params {
        merged.insert(key.clone(), value.clone());
      }
      Ok(Value::Object(merged))
    }
  }
}

/// Shallow-merge `source` into `target`. Non-object sources are ignored.
pub fn merge_objects(target: &mut Map<String, Value>, source: &Value) {
  if let Some(fields) = source.as_object() {
    for (key, value) in fields {
      target.insert(key.clone(), value.clone());
    }
  }
}

fn template_context(dataset: &Value) -> Value {
  match dataset {
    Value::Object(fields) if fields.contains_key(FLOW_KEY) && !fields.contains_key(FLOW_ALIAS) => {
      let mut fields = fields.clone();
      if let Some(flow) = fields.get(FLOW_KEY).cloned() {
        fields.insert(FLOW_ALIAS.to_string(), flow);
      }
      Value::Object(fields)
    }
    other => other.clone(),
  }
}

/// Return the inner expression when `template` is exactly `{{ expr }}`.
fn single_expression(template: &str) -> Option<&str> {
  let inner = template
    .trim()
    .strip_prefix("{{")?
    .strip_suffix("}}")?;

  if inner.contains("{{") || inner.contains("}}") || inner.trim().is_empty() {
    return None;
  }

  Some(inner.trim())
}

fn render_error(template: &str, e: minijinja::Error) -> TemplateError {
  TemplateError::Render {
    template: template.to_string(),
    message: e.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_transform_keeps_shape_and_types() {
    let engine = TemplateEngine::new();
    let data = json!({
      "name": "John",
      "age": 30,
      "address": { "street": "Main St", "city": "Boston" }
    });
    let spec = json!({
      "person": {
        "fullName": "{{name}}",
        "years": "{{age}}",
        "location": {
          "street": "{{address.street}}",
          "city": "{{ address.city }}"
        }
      }
    });

    let result = engine.transform(&data, &spec).unwrap();

    assert_eq!(
      result,
      json!({
        "person": {
          "fullName": "John",
          "years": 30,
          "location": { "street": "Main St", "city": "Boston" }
        }
      })
    );
  }

  #[test]
  fn test_transform_empty() {
    let engine = TemplateEngine::new();
    assert_eq!(engine.transform(&json!({}), &json!({})).unwrap(), json!({}));
  }

  #[test]
  fn test_mixed_text_renders_string() {
    let engine = TemplateEngine::new();
    let data = json!({ "name": "alice", "count": 5 });
    let spec = json!({ "msg": "Hello {{ name | title }}, you have {{ count }} messages" });

    let result = engine.transform(&data, &spec).unwrap();

    assert_eq!(result["msg"], "Hello Alice, you have 5 messages");
  }

  #[test]
  fn test_expression_arithmetic_and_arrays() {
    let engine = TemplateEngine::new();
    let data = json!({ "$flow": { "properties": { "item": 2 } } });
    let spec = json!({ "values": ["{{ flow.properties.item * 2 }}", "literal", 7] });

    let result = engine.transform(&data, &spec).unwrap();

    assert_eq!(result, json!({ "values": [4, "literal", 7] }));
  }

  #[test]
  fn test_undefined_expression_is_null() {
    let engine = TemplateEngine::new();
    let result = engine
      .transform(&json!({}), &json!({ "missing": "{{ nothing }}" }))
      .unwrap();
    assert_eq!(result["missing"], Value::Null);
  }

  #[test]
  fn test_invalid_template_errors() {
    let engine = TemplateEngine::new();
    let result = engine.transform(&json!({}), &json!({ "bad": "{{ 1 + }}" }));
    assert!(matches!(result, Err(TemplateError::Render { .. })));
  }

  #[test]
  fn test_materialize_without_transform_merges() {
    let engine = TemplateEngine::new();
    let result = materialize(
      &engine,
      &json!({ "foo": "bar" }),
      json!({ "baz": "qux", "foo": "shadowed" }),
    )
    .unwrap();
    assert_eq!(result, json!({ "foo": "bar", "baz": "qux" }));
  }

  #[test]
  fn test_materialize_with_transform_renders_only_transform() {
    let engine = TemplateEngine::new();
    let result = materialize(
      &engine,
      &json!({ "transform": { "in": "{{ requires.date }}-{{ suffix }}" }, "suffix": "z" }),
      json!({ "requires": { "date": "2024" } }),
    )
    .unwrap();
    assert_eq!(result, json!({ "in": "2024-z" }));
  }

  #[test]
  fn test_materialize_non_object_transform_is_plain_param() {
    let engine = TemplateEngine::new();
    let result = materialize(
      &engine,
      &json!({ "transform": "not-an-object", "foo": "bar" }),
      json!({ "baz": "qux" }),
    )
    .unwrap();
    assert_eq!(
      result,
      json!({ "transform": "not-an-object", "foo": "bar", "baz": "qux" })
    );
  }

  #[test]
  fn test_merge_objects_skips_non_objects() {
    let mut target = Map::new();
    merge_objects(&mut target, &json!({ "a": 1 }));
    merge_objects(&mut target, &json!("ignored"));
    merge_objects(&mut target, &json!({ "a": 2, "b": 3 }));
    assert_eq!(Value::Object(target), json!({ "a": 2, "b": 3 }));
  }
}
