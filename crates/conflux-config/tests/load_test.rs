//! File loading tests for flow definitions.

use std::io::Write;

use conflux_config::{ConfigError, FlowSpec, ResultKey};

#[tokio::test]
async fn test_from_file_json() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  write!(
    file,
    r#"{{ "tasks": {{ "echo": {{ "provides": ["output"], "resolver": {{ "name": "Echo", "results": {{ "out": "output" }} }} }} }} }}"#
  )
  .unwrap();

  let spec = FlowSpec::from_file(file.path()).await.unwrap();

  let results = spec.tasks["echo"].resolver.results.as_ref().unwrap();
  assert_eq!(results["out"], ResultKey::Rename("output".to_string()));
}

#[tokio::test]
async fn test_from_file_yaml() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(file, "tasks:").unwrap();
  writeln!(file, "  wait:").unwrap();
  writeln!(file, "    provides: [done]").unwrap();
  writeln!(file, "    resolver:").unwrap();
  writeln!(file, "      name: Wait").unwrap();
  writeln!(file, "      params: {{ ms: 10 }}").unwrap();

  let spec = FlowSpec::from_file(file.path()).await.unwrap();

  assert_eq!(spec.tasks["wait"].resolver.name, "Wait");
  assert_eq!(spec.tasks["wait"].resolver.params["ms"], 10);
}

#[tokio::test]
async fn test_from_file_missing() {
  let dir = tempfile::tempdir().unwrap();
  let err = FlowSpec::from_file(dir.path().join("missing.json"))
    .await
    .unwrap_err();

  assert!(matches!(err, ConfigError::Io { .. }));
}
