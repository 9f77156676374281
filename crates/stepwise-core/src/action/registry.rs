//! Type-keyed action registry.
//!
//! `ActionRegistry` implements `ActionExecutor` by routing each action to the
//! handler registered for its `type`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use stepwise_types::error::ActionError;
use stepwise_types::execution::Context;
use stepwise_types::workflow::Action;

use super::executor::ActionExecutor;

/// Handler for one action type.
pub trait ActionHandler: Send + Sync {
    fn handle(
        &self,
        action: &Action,
        ctx: &Context,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;
}

trait ActionHandlerDyn: Send + Sync {
    fn handle_boxed<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn handle_boxed<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>> {
        Box::pin(self.handle(action, ctx))
    }
}

/// Routes actions to handlers by `action.action_type`.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Box<dyn ActionHandlerDyn>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action_type`, replacing any previous one.
    pub fn register<H: ActionHandler + 'static>(&mut self, action_type: impl Into<String>, handler: H) {
        self.handlers.insert(action_type.into(), Box::new(handler));
    }

    pub fn with_handler<H: ActionHandler + 'static>(
        mut self,
        action_type: impl Into<String>,
        handler: H,
    ) -> Self {
        self.register(action_type, handler);
        self
    }

    pub fn supports(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered type names, sorted.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}

impl ActionExecutor for ActionRegistry {
    async fn execute(&self, action: &Action, ctx: &Context) -> Result<Value, ActionError> {
        let handler = self
            .handlers
            .get(&action.action_type)
            .ok_or_else(|| ActionError::UnknownType(action.action_type.clone()))?;

        tracing::debug!(
            execution_id = %ctx.execution_id,
            action_type = %action.action_type,
            "dispatching action"
        );
        handler.handle_boxed(action, ctx).await
    }
}
