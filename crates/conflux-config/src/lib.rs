//! Conflux Config
//!
//! This crate contains the serializable flow definition types for conflux.
//! A flow is a set of named tasks, each declaring the output keys it
//! `provides`, the output keys it `requires`, and the resolver that does the
//! work. Ordering comes from the requires/provides relation, never from the
//! order tasks are declared in.
//!
//! Definitions can be loaded from:
//! - JSON or YAML strings (`"...".parse::<FlowSpec>()`)
//! - JSON or YAML files (`FlowSpec::from_file`)
//!
//! ```yaml
//! tasks:
//!   greet:
//!     provides: [greeting]
//!     resolver:
//!       name: Echo
//!       params: { in: "hello" }
//!       results: { out: greeting }
//! ```

mod error;
mod flow;
mod result_map;
mod task;

pub use error::ConfigError;
pub use flow::FlowSpec;
pub use result_map::{ResultKey, ResultMap};
pub use task::{ResolverRef, TaskSpec};
