//! Built-in demo actions for `stepwise run`.
//!
//! | type    | config                   | output                  |
//! |---------|--------------------------|-------------------------|
//! | `log`   | `message` (`${var}` ok)  | `{"message": rendered}` |
//! | `set`   | `value`                  | `value`                 |
//! | `fail`  | optional `message`       | always fails            |
//! | `sleep` | `ms`                     | `{"slept_ms": ms}`      |

use std::time::Duration;

use anyhow::Result;
use console::style;
use serde_json::{Value, json};
use stepwise_core::action::registry::{ActionHandler, ActionRegistry};
use stepwise_types::error::ActionError;
use stepwise_types::execution::Context;
use stepwise_types::workflow::Action;

pub fn builtin_registry() -> ActionRegistry {
    ActionRegistry::new()
        .with_handler("log", LogAction)
        .with_handler("set", SetAction)
        .with_handler("fail", FailAction)
        .with_handler("sleep", SleepAction)
}

pub fn list_actions(json: bool) -> Result<()> {
    let registry = builtin_registry();
    let types = registry.action_types();
    if json {
        println!("{}", serde_json::to_string_pretty(&types)?);
    } else {
        println!();
        println!("  {}", style("Built-in actions").bold());
        for action_type in types {
            println!("  - {}", style(action_type).cyan());
        }
        println!();
    }
    Ok(())
}

struct LogAction;

impl ActionHandler for LogAction {
    async fn handle(&self, action: &Action, ctx: &Context) -> Result<Value, ActionError> {
        let message = action
            .config
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::InvalidConfig("log requires a string 'message'".to_string()))?;
        let rendered = interpolate(message, ctx);
        tracing::info!(execution_id = %ctx.execution_id, "{rendered}");
        Ok(json!({ "message": rendered }))
    }
}

struct SetAction;

impl ActionHandler for SetAction {
    async fn handle(&self, action: &Action, _ctx: &Context) -> Result<Value, ActionError> {
        action
            .config
            .get("value")
            .cloned()
            .ok_or_else(|| ActionError::InvalidConfig("set requires 'value'".to_string()))
    }
}

struct FailAction;

impl ActionHandler for FailAction {
    async fn handle(&self, action: &Action, ctx: &Context) -> Result<Value, ActionError> {
        let message = action
            .config
            .get("message")
            .and_then(Value::as_str)
            .map(|m| interpolate(m, ctx))
            .unwrap_or_else(|| "failed on purpose".to_string());
        Err(ActionError::Failed(message))
    }
}

struct SleepAction;

impl ActionHandler for SleepAction {
    async fn handle(&self, action: &Action, _ctx: &Context) -> Result<Value, ActionError> {
        let ms = action
            .config
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| ActionError::InvalidConfig("sleep requires integer 'ms'".to_string()))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }
}

/// Replace `${name}` with the variable's value. Strings are inserted raw,
/// other values as JSON; unknown names render as empty.
fn interpolate(template: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        match ctx.variables.get(after[..end].trim()) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => {}
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::action::executor::ActionExecutor;
    use uuid::Uuid;

    fn ctx() -> Context {
        Context::new("wf", Uuid::nil())
            .with_variable("name", json!("Ada"))
            .with_variable("count", json!(3))
    }

    #[test]
    fn interpolation_renders_variables() {
        let ctx = ctx();
        assert_eq!(interpolate("hi ${name}, ${count} left", &ctx), "hi Ada, 3 left");
        assert_eq!(interpolate("${ missing }!", &ctx), "!");
        assert_eq!(interpolate("open ${name", &ctx), "open ${name");
        assert_eq!(interpolate("plain", &ctx), "plain");
    }

    #[tokio::test]
    async fn builtins_dispatch_by_type() {
        let registry = builtin_registry();
        let ctx = ctx();

        let out = registry
            .execute(&Action::new("log", json!({ "message": "hello ${name}" })), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({ "message": "hello Ada" }));

        let out = registry
            .execute(&Action::new("set", json!({ "value": [1, 2] })), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!([1, 2]));

        let err = registry
            .execute(&Action::new("fail", json!({ "message": "no ${count}" })), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "action failed: no 3");
    }

    #[tokio::test]
    async fn missing_config_is_invalid() {
        let registry = builtin_registry();
        let err = registry
            .execute(&Action::new("set", json!({})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_for_configured_time() {
        let start = tokio::time::Instant::now();
        let out = builtin_registry()
            .execute(&Action::new("sleep", json!({ "ms": 250 })), &ctx())
            .await
            .unwrap();
        assert_eq!(out["slept_ms"], 250);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
