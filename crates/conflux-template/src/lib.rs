//! Conflux Template
//!
//! Pure data shaping used around resolver invocation:
//!
//! - [`remap`] renames and restructures a resolver's output according to a
//!   declarative [`ResultMap`](conflux_config::ResultMap).
//! - [`TemplateEngine`] materializes a resolver's input by rendering a
//!   `transform` block against a dataset with minijinja.
//! - [`materialize`] combines static params with a dataset, using the
//!   template engine only when params declare a `transform` object.

mod error;
mod remap;
mod transform;

pub use error::TemplateError;
pub use remap::remap;
pub use transform::{TemplateEngine, materialize, merge_objects};
