//! Transition resolution and definition-time graph validation.
//!
//! `TransitionResolver::determine_next_step` picks the next step after an
//! attempt finishes. `validate_workflow` models the step graph with
//! `petgraph` and returns advisory diagnostics; `dangling_transitions` is the
//! subset that makes a graph unrunnable.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde_json::Value;
use stepwise_types::condition::Condition;
use stepwise_types::execution::{Context, StepExecution};
use stepwise_types::workflow::{Step, StepKind, StepPayload, Transition, Workflow};

use super::condition::{ConditionEvaluator, EvaluationError, validate_condition};

const TRUE_LABELS: [&str; 3] = ["true", "yes", "success"];
const FALSE_LABELS: [&str; 3] = ["false", "no", "failure"];

fn has_label(transition: &Transition, labels: &[&str]) -> bool {
    transition
        .label
        .as_deref()
        .is_some_and(|label| labels.iter().any(|l| label.eq_ignore_ascii_case(l)))
}

// ---------------------------------------------------------------------------
// TransitionResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TransitionResolver {
    evaluator: ConditionEvaluator,
}

impl TransitionResolver {
    pub fn new(evaluator: ConditionEvaluator) -> Self {
        Self { evaluator }
    }

    /// Next step id after `record`, or `None` when no transition applies.
    ///
    /// 1. Action steps with explicit `on_success` / `on_failure` lists use
    ///    the list matching the outcome.
    /// 2. Condition steps with a boolean output take the transition labeled
    ///    `true`/`yes`/`success` or `false`/`no`/`failure`.
    /// 3. Otherwise guarded transitions are tried in order, then the first
    ///    unconditioned one.
    pub fn determine_next_step(
        &self,
        step: &Step,
        ctx: &Context,
        record: &StepExecution,
    ) -> Result<Option<String>, EvaluationError> {
        if let Some(action) = step.action() {
            let explicit = if record.is_failed() {
                action.on_failure.as_ref()
            } else {
                action.on_success.as_ref()
            };
            if let Some(transitions) = explicit {
                return self.select(transitions, ctx);
            }
        }

        if step.kind() == StepKind::Condition {
            if let Some(Value::Bool(outcome)) = &record.output {
                let labels: &[&str] = if *outcome { &TRUE_LABELS } else { &FALSE_LABELS };
                if let Some(t) = step.transitions.iter().find(|t| has_label(t, labels)) {
                    return Ok(Some(t.to.clone()));
                }
            }
        }

        self.select(&step.transitions, ctx)
    }

    fn select(&self, transitions: &[Transition], ctx: &Context) -> Result<Option<String>, EvaluationError> {
        for transition in transitions {
            if let Some(guard) = &transition.condition {
                if self.evaluator.evaluate(guard, ctx)? {
                    return Ok(Some(transition.to.clone()));
                }
            }
        }
        Ok(transitions
            .iter()
            .find(|t| t.condition.is_none())
            .map(|t| t.to.clone()))
    }
}

// ---------------------------------------------------------------------------
// Graph validation
// ---------------------------------------------------------------------------

/// Every outgoing edge of a step: its transitions plus any action
/// `on_success` / `on_failure` lists.
fn outgoing(step: &Step) -> impl Iterator<Item = &Transition> {
    let action_edges = step.action().into_iter().flat_map(|action| {
        action
            .on_success
            .iter()
            .chain(action.on_failure.iter())
            .flatten()
    });
    step.transitions.iter().chain(action_edges)
}

/// Problems that make a graph unrunnable: a missing start step or a
/// transition to an unknown step.
pub fn dangling_transitions(workflow: &Workflow) -> Vec<String> {
    let ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();
    let mut errors = Vec::new();

    if !ids.contains(workflow.start_step_id.as_str()) {
        errors.push(format!(
            "start step '{}' does not exist",
            workflow.start_step_id
        ));
    }
    for step in &workflow.steps {
        for transition in outgoing(step) {
            if !ids.contains(transition.to.as_str()) {
                errors.push(format!(
                    "step '{}': transition to unknown step '{}'",
                    step.id, transition.to
                ));
            }
        }
    }
    errors
}

/// Advisory diagnostics for a workflow definition. An empty list means the
/// graph is clean.
pub fn validate_workflow(workflow: &Workflow) -> Vec<String> {
    let mut errors = dangling_transitions(workflow);

    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
    }
    for end in &workflow.end_step_ids {
        if !seen.contains(end.as_str()) {
            errors.push(format!("end step '{end}' does not exist"));
        }
    }

    for step in &workflow.steps {
        if step.kind() == StepKind::Condition {
            if !step.transitions.iter().any(|t| has_label(t, &TRUE_LABELS)) {
                errors.push(format!("condition step '{}' has no true-branch transition", step.id));
            }
            if !step.transitions.iter().any(|t| has_label(t, &FALSE_LABELS)) {
                errors.push(format!("condition step '{}' has no false-branch transition", step.id));
            }
        }
        collect_step_condition_errors(step, &mut errors);
    }

    // Graph over known steps only; dangling edges were reported above.
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, NodeIndex> = workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), graph.add_node(s.id.as_str())))
        .collect();
    let mut edges = Vec::new();
    for step in &workflow.steps {
        for transition in outgoing(step) {
            if let (Some(&from), Some(&to)) =
                (nodes.get(step.id.as_str()), nodes.get(transition.to.as_str()))
            {
                if !edges.contains(&(from, to)) {
                    graph.add_edge(from, to, ());
                    edges.push((from, to));
                }
            }
        }
    }

    for &(from, to) in &edges {
        if reaches(&graph, to, from) {
            errors.push(format!(
                "transition '{}' -> '{}' closes a cycle",
                graph[from], graph[to]
            ));
        }
    }

    if let Some(&start) = nodes.get(workflow.start_step_id.as_str()) {
        let mut reachable = HashSet::new();
        let mut bfs = Bfs::new(&graph, start);
        while let Some(node) = bfs.next(&graph) {
            reachable.insert(node);
        }
        for step in &workflow.steps {
            if nodes
                .get(step.id.as_str())
                .is_some_and(|n| !reachable.contains(n))
            {
                errors.push(format!("step '{}' is unreachable from the start step", step.id));
            }
        }
    }

    errors
}

/// Forward BFS from `from`, reporting whether `to` is reached.
fn reaches(graph: &DiGraph<&str, ()>, from: NodeIndex, to: NodeIndex) -> bool {
    let mut bfs = Bfs::new(graph, from);
    while let Some(node) = bfs.next(graph) {
        if node == to {
            return true;
        }
    }
    false
}

/// Structural checks on every condition tree a step carries, nested branch
/// and loop-body steps included.
fn collect_step_condition_errors(step: &Step, errors: &mut Vec<String>) {
    let mut check = |where_: &str, condition: &Condition| {
        for problem in validate_condition(condition) {
            errors.push(format!("step '{}' {where_}: {problem}", step.id));
        }
    };

    for transition in outgoing(step) {
        if let Some(guard) = &transition.condition {
            check(&format!("guard to '{}'", transition.to), guard);
        }
    }
    match &step.payload {
        StepPayload::Condition { condition } => check("condition", condition),
        StepPayload::Loop(config) => {
            if let Some(condition) = &config.condition {
                check("loop condition", condition);
            }
            if let Some(condition) = &config.break_condition {
                check("break condition", condition);
            }
        }
        _ => {}
    }

    let nested: Vec<&Step> = match &step.payload {
        StepPayload::Parallel(config) => config.branches.iter().flatten().collect(),
        StepPayload::Loop(config) => config.body.iter().collect(),
        _ => Vec::new(),
    };
    for inner in nested {
        collect_step_condition_errors(inner, errors);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_types::condition::{Operand, Operator};
    use stepwise_types::workflow::{Action, WorkflowSettings};
    use uuid::Uuid;

    fn action_step(id: &str, transitions: Vec<Transition>) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_uppercase(),
            payload: StepPayload::Action(Action::new("noop", Value::Null)),
            transitions,
            timeout_ms: None,
        }
    }

    fn condition_step(id: &str, condition: Condition, transitions: Vec<Transition>) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_uppercase(),
            payload: StepPayload::Condition { condition },
            transitions,
            timeout_ms: None,
        }
    }

    fn workflow(steps: Vec<Step>, end: &[&str]) -> Workflow {
        Workflow {
            id: "wf".to_string(),
            name: "Test".to_string(),
            version: "1".to_string(),
            start_step_id: steps[0].id.clone(),
            steps,
            variables: vec![],
            end_step_ids: end.iter().map(|s| s.to_string()).collect(),
            settings: WorkflowSettings::default(),
        }
    }

    fn count_gt(n: i64) -> Condition {
        Condition::simple(
            Operator::GreaterThan,
            Operand::literal("${count}"),
            Some(Operand::literal(n)),
        )
    }

    fn ctx(count: i64) -> Context {
        Context::new("wf", Uuid::nil()).with_variable("count", json!(count))
    }

    fn succeeded(step_id: &str, output: Value) -> StepExecution {
        let mut record = StepExecution::start(step_id, 1);
        record.succeed(output);
        record
    }

    fn failed(step_id: &str) -> StepExecution {
        let mut record = StepExecution::start(step_id, 1);
        record.fail("boom");
        record
    }

    // -------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------

    #[test]
    fn condition_step_takes_true_label() {
        let step = condition_step(
            "check",
            count_gt(5),
            vec![
                Transition::new("check", "small").labeled("false"),
                Transition::new("check", "big").labeled("true"),
            ],
        );
        let resolver = TransitionResolver::default();
        let evaluator = ConditionEvaluator::new();

        let outcome = evaluator.evaluate(&count_gt(5), &ctx(10)).unwrap();
        let next = resolver
            .determine_next_step(&step, &ctx(10), &succeeded("check", json!(outcome)))
            .unwrap();
        assert_eq!(next.as_deref(), Some("big"));
    }

    #[test]
    fn condition_labels_are_case_insensitive() {
        let step = condition_step(
            "check",
            count_gt(5),
            vec![
                Transition::new("check", "go").labeled("YES"),
                Transition::new("check", "stop").labeled("No"),
            ],
        );
        let resolver = TransitionResolver::default();
        let next = resolver
            .determine_next_step(&step, &ctx(1), &succeeded("check", json!(false)))
            .unwrap();
        assert_eq!(next.as_deref(), Some("stop"));
    }

    #[test]
    fn guarded_transitions_win_over_unconditioned() {
        let step = action_step(
            "a",
            vec![
                Transition::new("a", "default"),
                Transition::new("a", "guarded").guarded(count_gt(5)),
            ],
        );
        let resolver = TransitionResolver::default();

        let next = resolver
            .determine_next_step(&step, &ctx(10), &succeeded("a", Value::Null))
            .unwrap();
        assert_eq!(next.as_deref(), Some("guarded"));

        let next = resolver
            .determine_next_step(&step, &ctx(1), &succeeded("a", Value::Null))
            .unwrap();
        assert_eq!(next.as_deref(), Some("default"));
    }

    #[test]
    fn no_applicable_transition_is_none() {
        let step = action_step("a", vec![Transition::new("a", "b").guarded(count_gt(5))]);
        let next = TransitionResolver::default()
            .determine_next_step(&step, &ctx(1), &succeeded("a", Value::Null))
            .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn action_outcome_lists_take_priority() {
        let mut step = action_step("charge", vec![Transition::new("charge", "ignored")]);
        if let StepPayload::Action(action) = &mut step.payload {
            action.on_success = Some(vec![Transition::new("charge", "receipt")]);
            action.on_failure = Some(vec![Transition::new("charge", "refund")]);
        }
        let resolver = TransitionResolver::default();

        let next = resolver
            .determine_next_step(&step, &ctx(0), &succeeded("charge", Value::Null))
            .unwrap();
        assert_eq!(next.as_deref(), Some("receipt"));

        let next = resolver
            .determine_next_step(&step, &ctx(0), &failed("charge"))
            .unwrap();
        assert_eq!(next.as_deref(), Some("refund"));
    }

    #[test]
    fn guard_evaluation_errors_propagate() {
        let bad = Condition::and(vec![]).with_id("empty-guard");
        let step = action_step("a", vec![Transition::new("a", "b").guarded(bad)]);
        let err = TransitionResolver::default()
            .determine_next_step(&step, &ctx(0), &succeeded("a", Value::Null))
            .unwrap_err();
        assert!(err.to_string().contains("empty-guard"));
    }

    // -------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------

    #[test]
    fn clean_linear_workflow_has_no_diagnostics() {
        let wf = workflow(
            vec![
                action_step("a", vec![Transition::new("a", "b")]),
                action_step("b", vec![Transition::new("b", "c")]),
                action_step("c", vec![]),
            ],
            &["c"],
        );
        assert!(validate_workflow(&wf).is_empty());
    }

    #[test]
    fn dangling_target_is_rejected() {
        let wf = workflow(
            vec![
                action_step("a", vec![Transition::new("a", "ghost")]),
                action_step("b", vec![]),
            ],
            &["b"],
        );
        let dangling = dangling_transitions(&wf);
        assert_eq!(dangling.len(), 1);
        assert!(dangling[0].contains("ghost"));
        assert!(!validate_workflow(&wf).is_empty());
    }

    #[test]
    fn missing_start_step_is_dangling() {
        let mut wf = workflow(vec![action_step("a", vec![])], &["a"]);
        wf.start_step_id = "nowhere".to_string();
        assert!(dangling_transitions(&wf)[0].contains("nowhere"));
    }

    #[test]
    fn condition_step_needs_both_branches() {
        let wf = workflow(
            vec![
                condition_step("check", count_gt(5), vec![Transition::new("check", "b").labeled("true")]),
                action_step("b", vec![]),
            ],
            &["b"],
        );
        let errors = validate_workflow(&wf);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no false-branch"));
    }

    #[test]
    fn cycles_are_reported() {
        let wf = workflow(
            vec![
                action_step("a", vec![Transition::new("a", "b")]),
                action_step("b", vec![Transition::new("b", "a"), Transition::new("b", "c")]),
                action_step("c", vec![]),
            ],
            &["c"],
        );
        let errors = validate_workflow(&wf);
        assert!(errors.iter().any(|e| e.contains("'a' -> 'b' closes a cycle")));
        assert!(errors.iter().any(|e| e.contains("'b' -> 'a' closes a cycle")));
        assert!(!errors.iter().any(|e| e.contains("'b' -> 'c'")));
    }

    #[test]
    fn unreachable_steps_are_reported() {
        let wf = workflow(
            vec![
                action_step("a", vec![Transition::new("a", "b")]),
                action_step("b", vec![]),
                action_step("orphan", vec![Transition::new("orphan", "b")]),
            ],
            &["b"],
        );
        let errors = validate_workflow(&wf);
        assert_eq!(errors, vec!["step 'orphan' is unreachable from the start step".to_string()]);
    }

    #[test]
    fn malformed_guards_are_reported() {
        let bad = Condition::simple(Operator::Unknown("LIKE".into()), Operand::var("x"), Some(Operand::literal(1)))
            .with_id("fuzzy");
        let wf = workflow(
            vec![
                action_step("a", vec![Transition::new("a", "b").guarded(bad)]),
                action_step("b", vec![]),
            ],
            &["b"],
        );
        let errors = validate_workflow(&wf);
        assert!(errors.iter().any(|e| e.contains("guard to 'b'") && e.contains("fuzzy")));
    }
}
