//! Resolver trait and the flow-scoped resolver registry.
//!
//! The registry is immutable once built. Per-run overrides are layered on
//! top of a base registry with [`Registry::with_overrides`], so a run never
//! leaks resolvers into another.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::context::WorkerContext;
use crate::error::ResolverError;
use crate::resolvers;

/// The function behind a task.
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Run with materialized `params`. `ctx` exposes the owning queue, the
  /// job being run, and the flow scope.
  async fn resolve(&self, params: Value, ctx: WorkerContext) -> Result<Value, ResolverError>;
}

struct FnResolver<F>(F);

#[async_trait]
impl<F, Fut> Resolver for FnResolver<F>
where
  F: Fn(Value, WorkerContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, ResolverError>> + Send,
{
  async fn resolve(&self, params: Value, ctx: WorkerContext) -> Result<Value, ResolverError> {
    (self.0)(params, ctx).await
  }
}

/// Wrap an async closure as a resolver.
///
/// ```ignore
/// let upper = resolver_fn(|params, _ctx| async move {
///   let text = params["text"].as_str().unwrap_or_default().to_uppercase();
///   Ok(json!({ "text": text }))
/// });
/// ```
pub fn resolver_fn<F, Fut>(f: F) -> Arc<dyn Resolver>
where
  F: Fn(Value, WorkerContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, ResolverError>> + Send + 'static,
{
  Arc::new(FnResolver(f))
}

/// Resolvers supplied by the caller for a single run.
pub type ResolverOverrides = HashMap<String, Arc<dyn Resolver>>;

static BUILTIN: LazyLock<Registry> = LazyLock::new(|| {
  let mut base = HashMap::new();
  resolvers::register_builtins(&mut base);
  Registry {
    base: Arc::new(base),
    overrides: Arc::default(),
  }
});

/// Named resolvers available to a flow.
#[derive(Clone, Default)]
pub struct Registry {
  base: Arc<HashMap<String, Arc<dyn Resolver>>>,
  overrides: Arc<ResolverOverrides>,
}

impl Registry {
  /// Registry holding the built-in control resolvers.
  pub fn builtin() -> Self {
    BUILTIN.clone()
  }

  /// Registry with no resolvers.
  pub fn empty() -> Self {
    Self::default()
  }

  /// Add a resolver to the base layer.
  pub fn register(mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) -> Self {
    Arc::make_mut(&mut self.base).insert(name.into(), resolver);
    self
  }

  /// A registry that consults `overrides` before this one.
  pub fn with_overrides(&self, overrides: ResolverOverrides) -> Self {
    if overrides.is_empty() {
      return self.clone();
    }

    let mut layered = (*self.overrides).clone();
    layered.extend(overrides);
    Self {
      base: self.base.clone(),
      overrides: Arc::new(layered),
    }
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Resolver>> {
    self
      .overrides
      .get(name)
      .or_else(|| self.base.get(name))
      .cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.overrides.contains_key(name) || self.base.contains_key(name)
  }

  /// Sorted, de-duplicated resolver names.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self
      .base
      .keys()
      .chain(self.overrides.keys())
      .cloned()
      .collect();
    names.sort();
    names.dedup();
    names
  }
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registry")
      .field("resolvers", &self.names())
      .finish()
  }
}
