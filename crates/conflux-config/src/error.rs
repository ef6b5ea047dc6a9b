use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read flow file {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("flow definition is neither valid JSON ({json}) nor valid YAML ({yaml})")]
  Parse { json: String, yaml: String },
}
