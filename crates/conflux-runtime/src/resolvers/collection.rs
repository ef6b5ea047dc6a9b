//! Resolvers that fan a single resolver out over many inputs: Repeater and
//! ArrayMap.
//!
//! Each invocation's params are materialized with the iteration number
//! available to templates as `count`, with `index` as an alias. Parallel mode fails as soon as any invocation fails;
//! sequential mode stops at the first failure.

use std::sync::Arc;

use async_trait::async_trait;
use conflux_template::{materialize, merge_objects};
use futures::future::try_join_all;
use serde_json::{Map, Value, json};

use super::{flag, required_str};
use crate::context::WorkerContext;
use crate::error::ResolverError;
use crate::registry::Resolver;

fn lookup(resolver: &str, ctx: &WorkerContext, params: &Value) -> Result<Arc<dyn Resolver>, ResolverError> {
  let name = required_str(resolver, params, "resolver")?;
  ctx
    .scope
    .registry
    .get(name)
    .ok_or_else(|| ResolverError::UnknownResolver {
      name: name.to_string(),
    })
}

/// Invoke `target` once per entry of `inputs`, materializing each against
/// the iteration number as `count` (and its alias `index`).
async fn fan_out(
  target: Arc<dyn Resolver>,
  inputs: Vec<Value>,
  parallel: bool,
  ctx: &WorkerContext,
) -> Result<Value, ResolverError> {
  let invoke = |index: usize, input: Value| {
    let target = target.clone();
    async move {
      let iteration = json!({ "count": index, "index": index });
      let params = materialize(ctx.scope.engine(), &input, iteration)?;
      target.resolve(params, ctx.clone()).await
    }
  };

  let results = if parallel {
    try_join_all(
      inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| invoke(index, input)),
    )
    .await?
  } else {
    let mut results = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
      results.push(invoke(index, input).await?);
    }
    results
  };

  Ok(json!({ "results": results }))
}

/// `{count, resolver, taskParams?, parallel?}` → `{results: [...]}`.
pub(crate) struct Repeater;

#[async_trait]
impl Resolver for Repeater {
  async fn resolve(&self, params: Value, ctx: WorkerContext) -> Result<Value, ResolverError> {
    let target = lookup("Repeater", &ctx, &params)?;
    let count = match params.get("count") {
      None | Some(Value::Null) => 0,
      Some(value) => value.as_u64().ok_or_else(|| {
        ResolverError::invalid_params("Repeater", "'count' must be a non-negative integer")
      })?,
    };
    let task_params = params.get("taskParams").cloned().unwrap_or_else(|| json!({}));

    let inputs = (0..count).map(|_| task_params.clone()).collect();
    fan_out(target, inputs, flag(&params, "parallel"), &ctx).await
  }
}

/// `{params: [...], resolver, taskParams?, parallel?}` → `{results: [...]}`.
///
/// Each entry of `params` is merged over `taskParams` for its invocation.
pub(crate) struct ArrayMap;

#[async_trait]
impl Resolver for ArrayMap {
  async fn resolve(&self, params: Value, ctx: WorkerContext) -> Result<Value, ResolverError> {
    let target = lookup("ArrayMap", &ctx, &params)?;
    let entries = params
      .get("params")
      .and_then(Value::as_array)
      .ok_or_else(|| ResolverError::invalid_params("ArrayMap", "'params' must be an array"))?;
    let base = params
      .get("taskParams")
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default();

    let inputs = entries
      .iter()
      .map(|entry| {
        let mut merged: Map<String, Value> = base.clone();
        merge_objects(&mut merged, entry);
        Value::Object(merged)
      })
      .collect();
    fan_out(target, inputs, flag(&params, "parallel"), &ctx).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::registry::{Registry, resolver_fn};

  /// Context whose registry has a "Failing" resolver counting its calls.
  fn failing_context() -> (WorkerContext, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let failing = {
      let calls = calls.clone();
      resolver_fn(move |_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(ResolverError::failed("nope")) }
      })
    };
    let mut ctx = WorkerContext::detached();
    ctx.scope.registry = Registry::builtin().register("Failing", failing);
    (ctx, calls)
  }

  #[tokio::test]
  async fn test_repeater_injects_index() {
    let params = json!({
      "count": 3,
      "resolver": "Echo",
      "taskParams": { "transform": { "in": "{{ index }}" } }
    });

    let output = Repeater.resolve(params, WorkerContext::detached()).await.unwrap();

    assert_eq!(
      output,
      json!({ "results": [{ "out": 0 }, { "out": 1 }, { "out": 2 }] })
    );
  }

  #[tokio::test]
  async fn test_repeater_exposes_count() {
    let params = json!({
      "count": 3,
      "resolver": "Echo",
      "taskParams": { "transform": { "in": "{{ count }}" } }
    });

    let output = Repeater.resolve(params, WorkerContext::detached()).await.unwrap();

    assert_eq!(
      output,
      json!({ "results": [{ "out": 0 }, { "out": 1 }, { "out": 2 }] })
    );
  }

  #[tokio::test]
  async fn test_repeater_sequential_stops_at_first_failure() {
    let (ctx, calls) = failing_context();
    let params = json!({ "count": 3, "resolver": "Failing" });

    let err = Repeater.resolve(params, ctx).await.unwrap_err();

    assert_eq!(err.to_string(), "nope");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_array_map_sequential_stops_at_first_failure() {
    let (ctx, calls) = failing_context();
    let params = json!({
      "params": [{ "n": 1 }, { "n": 2 }, { "n": 3 }],
      "resolver": "Failing"
    });

    let err = ArrayMap.resolve(params, ctx).await.unwrap_err();

    assert_eq!(err.to_string(), "nope");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_repeater_parallel_fails_fast() {
    let params = json!({
      "count": 2,
      "resolver": "ThrowError",
      "taskParams": { "message": "boom" },
      "parallel": true
    });

    let err = Repeater
      .resolve(params, WorkerContext::detached())
      .await
      .unwrap_err();

    assert_eq!(err.to_string(), "boom");
  }

  #[tokio::test]
  async fn test_repeater_requires_known_resolver() {
    let missing = Repeater
      .resolve(json!({ "count": 1 }), WorkerContext::detached())
      .await;
    assert!(matches!(missing, Err(ResolverError::InvalidParams { .. })));

    let unknown = Repeater
      .resolve(json!({ "count": 1, "resolver": "Nope" }), WorkerContext::detached())
      .await;
    assert!(matches!(unknown, Err(ResolverError::UnknownResolver { .. })));
  }

  #[tokio::test]
  async fn test_repeater_zero_count() {
    let output = Repeater
      .resolve(json!({ "resolver": "Noop" }), WorkerContext::detached())
      .await
      .unwrap();
    assert_eq!(output, json!({ "results": [] }));
  }

  #[tokio::test]
  async fn test_array_map_merges_entries() {
    let params = json!({
      "params": [{ "in": "a" }, { "in": "b" }],
      "resolver": "Echo",
      "taskParams": { "in": "default" },
      "parallel": true
    });

    let output = ArrayMap.resolve(params, WorkerContext::detached()).await.unwrap();

    assert_eq!(
      output,
      json!({ "results": [{ "out": "a" }, { "out": "b" }] })
    );
  }

  #[tokio::test]
  async fn test_array_map_transform_sees_entry_and_count() {
    let params = json!({
      "params": [{ "name": "x" }, { "name": "y" }],
      "resolver": "Echo",
      "taskParams": { "transform": { "in": "{{ name }}-{{ count }}" } }
    });

    let output = ArrayMap.resolve(params, WorkerContext::detached()).await.unwrap();

    assert_eq!(
      output,
      json!({ "results": [{ "out": "x-0" }, { "out": "y-1" }] })
    );
  }
}
