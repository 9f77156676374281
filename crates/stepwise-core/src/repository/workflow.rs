//! Workflow repository trait definition.
//!
//! Resolves a workflow id (and optional version) to a definition. The engine
//! only reads through it; authoring and versioning live elsewhere.

use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::Workflow;

/// Repository trait for workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert a definition, replacing any stored one with the same id and
    /// version.
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Look up a definition. `version = None` returns the most recently
    /// saved version.
    fn get_workflow(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Every stored definition, all versions.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;
}
