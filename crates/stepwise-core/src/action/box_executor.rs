//! BoxActionExecutor -- object-safe dynamic dispatch wrapper for ActionExecutor.
//!
//! 1. Define an object-safe `ActionExecutorDyn` trait with a boxed future
//! 2. Blanket-impl `ActionExecutorDyn` for all `T: ActionExecutor`
//! 3. `BoxActionExecutor` wraps `Arc<dyn ActionExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use stepwise_types::error::ActionError;
use stepwise_types::execution::Context;
use stepwise_types::workflow::Action;

use super::executor::ActionExecutor;

/// Object-safe version of [`ActionExecutor`] with a boxed future.
pub trait ActionExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>>;
}

impl<T: ActionExecutor> ActionExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>> {
        Box::pin(self.execute(action, ctx))
    }
}

/// Type-erased, cheaply cloneable action executor.
///
/// Parallel branches run on spawned tasks, so the engine shares one
/// executor across them through the inner `Arc`.
#[derive(Clone)]
pub struct BoxActionExecutor {
    inner: Arc<dyn ActionExecutorDyn>,
}

impl BoxActionExecutor {
    pub fn new<T: ActionExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub async fn execute(&self, action: &Action, ctx: &Context) -> Result<Value, ActionError> {
        self.inner.execute_boxed(action, ctx).await
    }
}

impl std::fmt::Debug for BoxActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxActionExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct Echo;

    impl ActionExecutor for Echo {
        async fn execute(&self, action: &Action, ctx: &Context) -> Result<Value, ActionError> {
            Ok(json!({ "type": action.action_type, "workflow": ctx.workflow_id }))
        }
    }

    #[tokio::test]
    async fn boxed_executor_delegates() {
        let executor = BoxActionExecutor::new(Echo);
        let clone = executor.clone();
        let ctx = Context::new("wf", Uuid::nil());

        let out = clone
            .execute(&Action::new("email", json!({})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({ "type": "email", "workflow": "wf" }));
    }
}
