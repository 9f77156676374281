//! The action executor collaborator.
//!
//! Concrete actions (email, approval, webhook, HTTP calls) live outside the
//! engine. The engine hands the `Action` descriptor and the live `Context`
//! to an `ActionExecutor` and records whatever output or error comes back.

use serde_json::Value;
use stepwise_types::error::ActionError;
use stepwise_types::execution::Context;
use stepwise_types::workflow::Action;

/// Runs one action. Implementations are keyed by `action.action_type`.
///
/// Uses RPITIT for `execute`; see [`BoxActionExecutor`](super::box_executor::BoxActionExecutor)
/// for dynamic dispatch.
pub trait ActionExecutor: Send + Sync {
    fn execute(
        &self,
        action: &Action,
        ctx: &Context,
    ) -> impl std::future::Future<Output = Result<Value, ActionError>> + Send;
}
