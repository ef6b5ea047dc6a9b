//! Resolvers that compose or control flows: SubFlow, Loop, Stop.

use std::collections::BTreeMap;

use async_trait::async_trait;
use conflux_config::{FlowSpec, TaskSpec};
use futures::future::try_join_all;
use serde_json::{Map, Value, json};
use tracing::warn;

use super::{flag, required_str};
use crate::context::WorkerContext;
use crate::error::ResolverError;
use crate::flow::FlowProducer;
use crate::registry::{Resolver, ResolverOverrides};

fn string_list(resolver: &str, value: Option<&Value>) -> Result<Vec<String>, ResolverError> {
  match value {
    None | Some(Value::Null) => Ok(Vec::new()),
    Some(value) => serde_json::from_value(value.clone())
      .map_err(|e| ResolverError::invalid_params(resolver, format!("expected a list of strings: {}", e))),
  }
}

/// Runs `flowSpec` as a nested flow and returns its merged output.
///
/// Any failure, including an invalid definition, is returned as data
/// (`{"error": message}`) rather than failing the task.
pub(crate) struct SubFlow;

#[async_trait]
impl Resolver for SubFlow {
  async fn resolve(&self, params: Value, ctx: WorkerContext) -> Result<Value, ResolverError> {
    match run_sub_flow(&params, &ctx).await {
      Ok(output) => Ok(output),
      Err(e) => {
        warn!(job_id = %ctx.job.id, task = %ctx.job.task_name, error = %e, "sub_flow_failed");
        Ok(json!({ "error": e.to_string() }))
      }
    }
  }
}

async fn run_sub_flow(params: &Value, ctx: &WorkerContext) -> Result<Value, ResolverError> {
  let spec = params
    .get("flowSpec")
    .cloned()
    .ok_or_else(|| ResolverError::invalid_params("SubFlow", "'flowSpec' is required"))?;
  let spec: FlowSpec = serde_json::from_value(spec)
    .map_err(|e| ResolverError::invalid_params("SubFlow", e.to_string()))?;
  let expected = string_list("SubFlow", params.get("flowExpectedResults"))?;
  let flow_params = params
    .get("flowParams")
    .cloned()
    .unwrap_or_else(|| ctx.scope.params.clone());

  let producer = FlowProducer::nested(spec, &ctx.scope)?;
  let output = producer
    .run(
      flow_params,
      &expected,
      ResolverOverrides::new(),
      ctx.scope.context.clone(),
    )
    .await?;
  Ok(output)
}

/// Runs the `subtask` tasks once per item of `inCollection`, with the item
/// exposed as flow param `inItemName`, and collects each run's
/// `outItemName` value into `outCollection` in input order.
pub(crate) struct Loop;

#[async_trait]
impl Resolver for Loop {
  async fn resolve(&self, params: Value, ctx: WorkerContext) -> Result<Value, ResolverError> {
    let items = params
      .get("inCollection")
      .and_then(Value::as_array)
      .ok_or_else(|| ResolverError::invalid_params("Loop", "'inCollection' must be an array"))?;
    let in_name = required_str("Loop", &params, "inItemName")?;
    let out_name = required_str("Loop", &params, "outItemName")?;
    let tasks: BTreeMap<String, TaskSpec> = params
      .get("subtask")
      .cloned()
      .map(serde_json::from_value::<BTreeMap<String, TaskSpec>>)
      .transpose()
      .map_err(|e| ResolverError::invalid_params("Loop", format!("invalid 'subtask': {}", e)))?
      .ok_or_else(|| ResolverError::invalid_params("Loop", "'subtask' is required"))?;
    let spec = FlowSpec { tasks };
    let expected = vec![out_name.to_string()];

    let run_item = |item: Value| {
      let spec = spec.clone();
      let expected = &expected;
      let ctx = &ctx;
      async move {
        let mut flow_params = Map::new();
        flow_params.insert(in_name.to_string(), item);
        let output = FlowProducer::nested(spec, &ctx.scope)?
          .run(
            Value::Object(flow_params),
            expected,
            ResolverOverrides::new(),
            ctx.scope.context.clone(),
          )
          .await?;
        Ok::<_, ResolverError>(output.get(out_name).cloned().unwrap_or(Value::Null))
      }
    };

    let out_collection = if flag(&params, "parallel") {
      try_join_all(items.iter().cloned().map(run_item)).await?
    } else {
      let mut collected = Vec::with_capacity(items.len());
      for item in items {
        collected.push(run_item(item.clone()).await?);
      }
      collected
    };

    Ok(json!({ "outCollection": out_collection }))
  }
}

/// Stops the queue running this job and returns the stop report.
pub(crate) struct Stop;

#[async_trait]
impl Resolver for Stop {
  async fn resolve(&self, _params: Value, ctx: WorkerContext) -> Result<Value, ResolverError> {
    let report = ctx.queue.stop()?;
    let report = serde_json::to_value(report).map_err(|e| ResolverError::failed(e.to_string()))?;
    Ok(json!({ "promise": report }))
  }
}
