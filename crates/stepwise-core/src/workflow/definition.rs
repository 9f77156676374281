//! Workflow definition loading.
//!
//! Definitions are authored as YAML (default) or JSON and deserialize
//! straight into [`Workflow`]. Structural checks are left to
//! [`validate_workflow`](super::transition::validate_workflow).

use std::path::Path;

use stepwise_types::workflow::Workflow;

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn parse_workflow_json(json: &str) -> Result<Workflow, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Load a workflow file. `.json` files are read as JSON, anything else as
/// YAML.
pub async fn load_workflow_file(path: &Path) -> Result<Workflow, DefinitionError> {
    let content = tokio::fs::read_to_string(path).await?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_workflow_json(&content)
    } else {
        parse_workflow_yaml(&content)
    }
}
