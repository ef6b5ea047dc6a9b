//! Stateless resolvers: Echo, Noop, ThrowError, Conditional, Wait.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::truthy;
use crate::context::WorkerContext;
use crate::error::ResolverError;
use crate::registry::Resolver;

pub(crate) const THROW_ERROR_DEFAULT: &str = "ThrowErrorResolver resolver has thrown an error";

/// `{in}` → `{out: in}`.
pub(crate) struct Echo;

#[async_trait]
impl Resolver for Echo {
  async fn resolve(&self, params: Value, _ctx: WorkerContext) -> Result<Value, ResolverError> {
    Ok(json!({ "out": params.get("in").cloned().unwrap_or(Value::Null) }))
  }
}

/// Always returns `{}`.
pub(crate) struct Noop;

#[async_trait]
impl Resolver for Noop {
  async fn resolve(&self, _params: Value, _ctx: WorkerContext) -> Result<Value, ResolverError> {
    Ok(json!({}))
  }
}

pub(crate) struct ThrowError;

#[async_trait]
impl Resolver for ThrowError {
  async fn resolve(&self, params: Value, _ctx: WorkerContext) -> Result<Value, ResolverError> {
    let message = match params.get("message") {
      None | Some(Value::Null) => THROW_ERROR_DEFAULT.to_string(),
      Some(Value::String(message)) => message.clone(),
      Some(other) => other.to_string(),
    };
    Err(ResolverError::failed(message))
  }
}

/// `{onTrue: trueResult}` or `{onFalse: falseResult}`.
pub(crate) struct Conditional;

#[async_trait]
impl Resolver for Conditional {
  async fn resolve(&self, params: Value, _ctx: WorkerContext) -> Result<Value, ResolverError> {
    let branch = |key: &str| params.get(key).cloned().unwrap_or(Value::Null);
    if params.get("condition").is_some_and(truthy) {
      Ok(json!({ "onTrue": branch("trueResult") }))
    } else {
      Ok(json!({ "onFalse": branch("falseResult") }))
    }
  }
}

/// Sleeps `ms` milliseconds without blocking other jobs, then returns
/// `{result}`.
pub(crate) struct Wait;

#[async_trait]
impl Resolver for Wait {
  async fn resolve(&self, params: Value, _ctx: WorkerContext) -> Result<Value, ResolverError> {
    let ms = match params.get("ms") {
      None | Some(Value::Null) => 0,
      Some(value) => value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
        .ok_or_else(|| ResolverError::invalid_params("Wait", "'ms' must be a number"))?,
    };

    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(json!({ "result": params.get("result").cloned().unwrap_or(Value::Null) }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Instant;

  async fn run(resolver: impl Resolver, params: Value) -> Result<Value, ResolverError> {
    resolver.resolve(params, WorkerContext::detached()).await
  }

  #[tokio::test]
  async fn test_echo() {
    assert_eq!(run(Echo, json!({ "in": "test" })).await.unwrap(), json!({ "out": "test" }));
    assert_eq!(run(Echo, json!({})).await.unwrap(), json!({ "out": null }));
  }

  #[tokio::test]
  async fn test_noop_ignores_input() {
    assert_eq!(run(Noop, json!({ "a": 1 })).await.unwrap(), json!({}));
  }

  #[tokio::test]
  async fn test_throw_error_messages() {
    let err = run(ThrowError, json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), THROW_ERROR_DEFAULT);

    let err = run(ThrowError, json!({ "message": "X" })).await.unwrap_err();
    assert_eq!(err.to_string(), "X");
  }

  #[tokio::test]
  async fn test_conditional_branches() {
    let params = |condition: Value| {
      json!({ "condition": condition, "trueResult": { "v": 1 }, "falseResult": { "v": 2 } })
    };
    assert_eq!(
      run(Conditional, params(json!(true))).await.unwrap(),
      json!({ "onTrue": { "v": 1 } })
    );
    assert_eq!(
      run(Conditional, params(json!(0))).await.unwrap(),
      json!({ "onFalse": { "v": 2 } })
    );
    assert_eq!(
      run(Conditional, json!({})).await.unwrap(),
      json!({ "onFalse": null })
    );
  }

  #[tokio::test]
  async fn test_wait_sleeps_and_returns_result() {
    let started = Instant::now();
    let output = run(Wait, json!({ "ms": 20, "result": { "done": true } })).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(output, json!({ "result": { "done": true } }));

    assert_eq!(run(Wait, json!({ "ms": 0 })).await.unwrap(), json!({ "result": null }));
    assert!(run(Wait, json!({ "ms": "soon" })).await.is_err());
  }
}
