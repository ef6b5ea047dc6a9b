//! Conflux Runtime
//!
//! Executes flows of named tasks whose ordering is derived from the output
//! keys they `provide` and `require`, rather than from explicit edges.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       FlowProducer                          │
//! │  - compiles a FlowSpec into jobs on a private Queue         │
//! │  - run(params, expected, overrides, context) → output       │
//! │  - filters, remaps, and merges requested outputs            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Queue                              │
//! │  - pending / in-flight / results, bounded concurrency       │
//! │  - callback registry used for dependency waits              │
//! │  - start / pause / stop lifecycle, drain notification       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Registry                            │
//! │  - named resolvers, built-ins plus per-run overrides        │
//! │  - control resolvers recurse into nested FlowProducers      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use conflux_config::FlowSpec;
//! use conflux_runtime::FlowProducer;
//!
//! let spec: FlowSpec = r#"{"tasks": {"echo": {
//!   "provides": ["output"],
//!   "resolver": {"name": "Echo", "params": {"in": "test"}, "results": {"out": "output"}}
//! }}}"#.parse()?;
//!
//! let output = FlowProducer::run_with(spec, json!({}), &["output".into()], json!({})).await?;
//! assert_eq!(output, json!({"output": "test"}));
//! ```

mod callbacks;
mod config;
mod context;
mod error;
mod events;
mod flow;
mod job;
mod queue;
mod registry;
mod resolvers;
mod scheduler;

pub use callbacks::{Caller, Handler};
pub use config::{FailurePolicy, RuntimeConfig};
pub use context::{FlowScope, WorkerContext, build_dependency_context};
pub use error::{FlowError, JobError, QueueError, ResolverError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use flow::FlowProducer;
pub use job::{Job, JobEvent, JobId, JobStatus};
pub use queue::{Queue, QueueSnapshot, QueueStatus, StopReport};
pub use registry::{Registry, Resolver, ResolverOverrides, resolver_fn};
