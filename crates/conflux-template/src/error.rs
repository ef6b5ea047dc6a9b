/// Errors raised while materializing resolver input.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
  /// A template string failed to compile or render.
  #[error("failed to render template '{template}': {message}")]
  Render { template: String, message: String },

  /// An expression evaluated to a value with no JSON representation.
  #[error("template '{template}' produced a non-JSON value: {message}")]
  Conversion { template: String, message: String },
}
