//! `validate` and `run` handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use stepwise_core::action::box_executor::BoxActionExecutor;
use stepwise_core::event::bus::EventBus;
use stepwise_core::repository::memory::InMemoryWorkflowRepository;
use stepwise_core::workflow::definition::load_workflow_file;
use stepwise_core::workflow::executor::ExecutionEngine;
use stepwise_core::workflow::transition::validate_workflow;
use stepwise_types::config::EngineConfig;
use stepwise_types::event::EngineEvent;
use stepwise_types::execution::{ContextOverrides, Execution, ExecutionStatus, StepStatus};
use tokio::sync::broadcast;

use super::actions::builtin_registry;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let workflow = load_workflow_file(file)
        .await
        .with_context(|| format!("failed to load {}", file.display()))?;
    let diagnostics = validate_workflow(&workflow);

    if json {
        let out = serde_json::json!({
            "workflow_id": workflow.id,
            "version": workflow.version,
            "valid": diagnostics.is_empty(),
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if diagnostics.is_empty() {
        println!();
        println!(
            "  {} '{}' v{} is valid ({} steps)",
            style("✓").green().bold(),
            style(&workflow.id).cyan(),
            workflow.version,
            workflow.steps.len()
        );
        println!();
    } else {
        println!();
        println!(
            "  {} '{}' has {} problem(s):",
            style("✗").red().bold(),
            style(&workflow.id).cyan(),
            diagnostics.len()
        );
        for diagnostic in &diagnostics {
            println!("    - {diagnostic}");
        }
        println!();
    }

    if !diagnostics.is_empty() {
        bail!("workflow '{}' failed validation", workflow.id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    file: &Path,
    vars: Vec<(String, Value)>,
    tenant: Option<String>,
    config: EngineConfig,
    json: bool,
) -> Result<()> {
    let workflow = load_workflow_file(file)
        .await
        .with_context(|| format!("failed to load {}", file.display()))?;

    let event_bus = EventBus::new(config.event_bus_capacity);
    let events = tokio::spawn(log_events(event_bus.subscribe()));
    let engine = Arc::new(ExecutionEngine::new(
        BoxActionExecutor::new(builtin_registry()),
        Arc::new(InMemoryWorkflowRepository::with_workflows([workflow.clone()])),
        event_bus,
        config,
    ));

    let mut overrides = ContextOverrides {
        tenant_id: tenant,
        ..ContextOverrides::default()
    };
    overrides.variables.extend(vars);
    let execution_id = engine.prepare(&workflow, overrides, Some("cli"))?;

    let mut run = {
        let engine = Arc::clone(&engine);
        let workflow = workflow.clone();
        tokio::spawn(async move { engine.run(execution_id, &workflow).await })
    };

    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(execution_id = %execution_id, "interrupt received, cancelling");
            engine.cancel_execution(execution_id)?;
            run.await
        }
    };
    let execution = joined.context("execution task panicked")??;
    events.abort();

    display_execution(&execution, json)?;
    if execution.status == ExecutionStatus::Failed {
        bail!("execution {} failed", execution.id);
    }
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::debug!(?event, "engine event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn display_execution(execution: &Execution, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(execution)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} of '{}' v{}",
        style("Execution").bold(),
        style(execution.id).cyan(),
        execution.workflow_id,
        execution.workflow_version
    );
    println!("  Status: {}", execution.status);
    if let Some(duration) = execution.duration_ms {
        println!("  Duration: {duration}ms");
    }
    println!(
        "  Steps: {} completed, {} failed, {} skipped, {} retries",
        execution.metrics.completed_steps,
        execution.metrics.failed_steps,
        execution.metrics.skipped_steps,
        execution.metrics.retry_count
    );
    println!();

    if !execution.step_executions.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Step", "Attempt", "Status", "Duration", "Error"]);
        for record in &execution.step_executions {
            table.add_row(vec![
                Cell::new(&record.step_id),
                Cell::new(record.attempt),
                format_step_status(record.status),
                Cell::new(
                    record
                        .duration_ms()
                        .map(|ms| format!("{ms}ms"))
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::new(record.error.as_deref().unwrap_or("")),
            ]);
        }
        println!("{table}");
        println!();
    }

    if let Some(ref error) = execution.error {
        println!("  {} [{:?}] {}", style("Error:").red().bold(), error.code, style(&error.message).red());
        println!();
    }
    Ok(())
}

fn format_step_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Running => Cell::new("running").fg(Color::Blue),
        StepStatus::Success => Cell::new("success").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        StepStatus::Skipped => Cell::new("skipped").fg(Color::DarkYellow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FLOW: &str = r#"
id: greet
name: Greet
version: "1"
start_step_id: hello
end_step_ids: [bye]
steps:
  - id: hello
    name: Hello
    kind: action
    type: log
    config: { message: "hello ${who}" }
    transitions: [{ from: hello, to: bye }]
  - id: bye
    name: Bye
    kind: action
    type: set
    config: { value: done }
"#;

    async fn write_flow(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("flow.yaml");
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn validate_accepts_sound_workflow() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(dir.path(), FLOW).await;
        handle_validate(&path, true).await.unwrap();
    }

    #[tokio::test]
    async fn validate_rejects_dangling_transition() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(dir.path(), &FLOW.replace("to: bye", "to: ghost")).await;
        let err = handle_validate(&path, true).await.unwrap_err();
        assert!(err.to_string().contains("failed validation"));
    }

    #[tokio::test]
    async fn run_completes_with_builtin_actions() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(dir.path(), FLOW).await;
        handle_run(
            &path,
            vec![("who".to_string(), serde_json::json!("world"))],
            None,
            EngineConfig::default(),
            true,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failed_run_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_flow(dir.path(), &FLOW.replace("type: set", "type: fail")).await;
        let err = handle_run(&path, vec![], None, EngineConfig::default(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }
}
