//! In-process `WorkflowRepository` backed by a `DashMap`.

use dashmap::DashMap;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::Workflow;

use super::workflow::WorkflowRepository;

/// Keeps every saved version per workflow id, in save order.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<String, Vec<Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository with definitions.
    pub fn with_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        let repo = Self::new();
        for workflow in workflows {
            repo.insert(workflow);
        }
        repo
    }

    fn insert(&self, workflow: Workflow) {
        let mut versions = self.workflows.entry(workflow.id.clone()).or_default();
        versions.retain(|w| w.version != workflow.version);
        versions.push(workflow);
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        if workflow.id.trim().is_empty() {
            return Err(RepositoryError::Query("workflow id is empty".to_string()));
        }
        self.insert(workflow.clone());
        tracing::debug!(workflow_id = %workflow.id, version = %workflow.version, "saved workflow");
        Ok(())
    }

    async fn get_workflow(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let Some(versions) = self.workflows.get(id) else {
            return Ok(None);
        };
        let found = match version {
            Some(version) => versions.iter().find(|w| w.version == version),
            None => versions.last(),
        };
        Ok(found.cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        Ok(self
            .workflows
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect())
    }
}
