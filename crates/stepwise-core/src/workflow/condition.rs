//! Condition evaluator for transition guards, condition steps and loops.
//!
//! Evaluates a typed `Condition` tree against an execution `Context`. Also
//! provides a parser for a small infix grammar (`count > 5`,
//! `name == 'John'`) and a structural validator run at definition time.
//!
//! Only malformed conditions are errors. Missing variables resolve to
//! `null`, incomparable operands compare `false`, and a regex that compiles
//! but does not match is simply `false`.

use std::cmp::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use stepwise_types::condition::{Condition, LogicalOperator, Operand, Operator};
use stepwise_types::execution::Context;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while evaluating or parsing a condition.
///
/// Every variant names the offending condition ID (`<anonymous>` when the
/// condition carries none).
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("condition '{condition}': unknown operator '{operator}'")]
    UnknownOperator { condition: String, operator: String },

    #[error("condition '{condition}': composite {operator:?} has no sub-conditions")]
    EmptyComposite {
        condition: String,
        operator: LogicalOperator,
    },

    #[error("condition '{condition}': operator '{operator}' requires a right operand")]
    MissingOperand { condition: String, operator: String },

    #[error("condition '{condition}': invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        condition: String,
        pattern: String,
        reason: String,
    },

    #[error("cannot parse expression '{expression}': {reason}")]
    Parse { expression: String, reason: String },
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Evaluates condition trees. Cheap to clone; compiled regexes are shared.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    regex_cache: Arc<DashMap<String, Regex>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `condition` against `ctx`.
    pub fn evaluate(&self, condition: &Condition, ctx: &Context) -> Result<bool, EvaluationError> {
        match condition {
            Condition::Simple {
                operator,
                left,
                right,
                ..
            } => self.evaluate_simple(condition, operator, left, right.as_ref(), ctx),
            Condition::Composite {
                operator,
                conditions,
                ..
            } => {
                if conditions.is_empty() {
                    return Err(EvaluationError::EmptyComposite {
                        condition: condition.display_id().to_string(),
                        operator: *operator,
                    });
                }
                match operator {
                    LogicalOperator::And => {
                        for sub in conditions {
                            if !self.evaluate(sub, ctx)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    LogicalOperator::Or => {
                        for sub in conditions {
                            if self.evaluate(sub, ctx)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    // Entries after the first are ignored.
                    LogicalOperator::Not => Ok(!self.evaluate(&conditions[0], ctx)?),
                }
            }
        }
    }

    fn evaluate_simple(
        &self,
        condition: &Condition,
        operator: &Operator,
        left: &Operand,
        right: Option<&Operand>,
        ctx: &Context,
    ) -> Result<bool, EvaluationError> {
        let id = || condition.display_id().to_string();

        if let Operator::Unknown(raw) = operator {
            return Err(EvaluationError::UnknownOperator {
                condition: id(),
                operator: raw.clone(),
            });
        }

        let lhs = resolve_operand(left, ctx);
        if !operator.is_binary() {
            return Ok(match operator {
                Operator::IsNotNull => !lhs.is_null(),
                _ => lhs.is_null(),
            });
        }

        let rhs = match right {
            Some(operand) => resolve_operand(operand, ctx),
            None => {
                return Err(EvaluationError::MissingOperand {
                    condition: id(),
                    operator: operator.to_string(),
                });
            }
        };

        let result = match operator {
            Operator::Equals => strict_equals(&lhs, &rhs),
            Operator::NotEquals => !strict_equals(&lhs, &rhs),
            Operator::GreaterThan => compare(&lhs, &rhs) == Some(Ordering::Greater),
            Operator::LessThan => compare(&lhs, &rhs) == Some(Ordering::Less),
            Operator::GreaterThanOrEqual => {
                matches!(compare(&lhs, &rhs), Some(Ordering::Greater | Ordering::Equal))
            }
            Operator::LessThanOrEqual => {
                matches!(compare(&lhs, &rhs), Some(Ordering::Less | Ordering::Equal))
            }
            Operator::Contains => contains(&lhs, &rhs),
            Operator::NotContains => !contains(&lhs, &rhs),
            Operator::StartsWith => coerce_string(&lhs).starts_with(&coerce_string(&rhs)),
            Operator::EndsWith => coerce_string(&lhs).ends_with(&coerce_string(&rhs)),
            Operator::MatchesRegex => {
                let pattern = coerce_string(&rhs);
                let regex = self.compile(&pattern).map_err(|e| EvaluationError::InvalidRegex {
                    condition: id(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                regex.is_match(&coerce_string(&lhs))
            }
            Operator::In => match &rhs {
                Value::Array(items) => items.iter().any(|item| strict_equals(item, &lhs)),
                _ => false,
            },
            Operator::NotIn => match &rhs {
                Value::Array(items) => !items.iter().any(|item| strict_equals(item, &lhs)),
                _ => false,
            },
            // Unary and unknown operators returned above.
            Operator::IsNull | Operator::IsNotNull | Operator::Unknown(_) => false,
        };

        Ok(result)
    }

    fn compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(cached) = self.regex_cache.get(pattern) {
            return Ok(cached.clone());
        }
        let regex = Regex::new(pattern)?;
        self.regex_cache.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

// ---------------------------------------------------------------------------
// Operand resolution
// ---------------------------------------------------------------------------

/// Resolve an operand: `${name}` strings and explicit references are looked
/// up in the context, any other literal passes through.
pub fn resolve_operand(operand: &Operand, ctx: &Context) -> Value {
    match operand {
        Operand::Variable(reference) => resolve_variable(&reference.var, ctx),
        Operand::Path(path) => resolve_path(&path.path, ctx),
        Operand::Literal(Value::String(s)) => match parse_reference(s) {
            Some(name) => resolve_variable(name, ctx),
            None => Value::String(s.clone()),
        },
        Operand::Literal(value) => value.clone(),
    }
}

/// `${name}` -> `Some("name")`.
fn parse_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?.trim();
    (!inner.is_empty()).then_some(inner)
}

fn resolve_variable(name: &str, ctx: &Context) -> Value {
    if let Some(value) = ctx.variables.get(name) {
        return value.clone();
    }
    if name.contains('.') {
        resolve_path(name, ctx)
    } else {
        Value::Null
    }
}

/// Walk a dotted path. A leading variable name walks into that variable,
/// otherwise the walk starts at the context root (`metadata`, `variables`,
/// `tenantId`, ...). Returns `null` at the first missing segment.
fn resolve_path(path: &str, ctx: &Context) -> Value {
    let root = ctx.to_path_root();
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Value::Null;
    };

    let mut current = match ctx.variables.get(first).or_else(|| root.get(first)) {
        Some(value) => value,
        None => return Value::Null,
    };

    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }

    current.clone()
}

// ---------------------------------------------------------------------------
// Comparison helpers
// ---------------------------------------------------------------------------

/// Strict equality: no type coercion, but `10` and `10.0` are the same number.
fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering for numbers and strings; everything else is incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(coerce_string(needle).as_str()),
        Value::Array(items) => items.iter().any(|item| strict_equals(item, needle)),
        Value::Object(map) => map.contains_key(&coerce_string(needle)),
        _ => false,
    }
}

/// String coercion used by the string operators.
fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Array(items) => items.iter().map(coerce_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Infix expression parser
// ---------------------------------------------------------------------------

const SYMBOL_OPERATORS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];
const WORD_OPERATORS: [&str; 5] = ["contains", "startsWith", "endsWith", "matches", "in"];

/// Parse `left <op> right` into a simple condition.
///
/// Operands are `'quoted'` or `"quoted"` strings, numbers, `true`, `false`,
/// `null`, JSON arrays, `${name}` references or bare identifiers (which are
/// variable references, dotted paths allowed).
pub fn parse_expression(expression: &str) -> Result<Condition, EvaluationError> {
    let parse_err = |reason: &str| EvaluationError::Parse {
        expression: expression.to_string(),
        reason: reason.to_string(),
    };

    let (start, op_text) = find_operator(expression).ok_or_else(|| parse_err("no operator found"))?;
    let left = expression[..start].trim();
    let right = expression[start + op_text.len()..].trim();
    if left.is_empty() {
        return Err(parse_err("missing left operand"));
    }
    if right.is_empty() {
        return Err(parse_err("missing right operand"));
    }

    let operator = match op_text {
        "contains" => Operator::Contains,
        "startsWith" => Operator::StartsWith,
        "endsWith" => Operator::EndsWith,
        "matches" => Operator::MatchesRegex,
        "in" => Operator::In,
        symbol => Operator::parse(symbol),
    };

    let left = parse_operand(left).ok_or_else(|| parse_err("invalid left operand"))?;
    let right = parse_operand(right).ok_or_else(|| parse_err("invalid right operand"))?;
    Ok(Condition::simple(operator, left, Some(right)))
}

/// First operator outside of quotes: `(byte offset, operator text)`.
fn find_operator(expression: &str) -> Option<(usize, &'static str)> {
    let mut quote: Option<char> = None;
    let mut prev_is_space = false;

    for (i, c) in expression.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            prev_is_space = false;
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
            prev_is_space = false;
            continue;
        }

        let rest = &expression[i..];
        if let Some(symbol) = SYMBOL_OPERATORS.iter().find(|s| rest.starts_with(**s)) {
            return Some((i, symbol));
        }
        if prev_is_space {
            for word in WORD_OPERATORS {
                if rest.starts_with(word)
                    && rest[word.len()..].chars().next().is_some_and(char::is_whitespace)
                {
                    return Some((i, word));
                }
            }
        }
        prev_is_space = c.is_whitespace();
    }
    None
}

fn parse_operand(text: &str) -> Option<Operand> {
    let text = text.trim();
    for q in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return Some(Operand::literal(&text[1..text.len() - 1]));
        }
    }
    if let Some(name) = parse_reference(text) {
        return Some(Operand::var(name));
    }
    match text {
        "true" => return Some(Operand::literal(true)),
        "false" => return Some(Operand::literal(false)),
        "null" => return Some(Operand::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Operand::literal(n));
    }
    // `inf` / `nan` parse as floats but are identifiers here.
    if let Some(f) = text.parse::<f64>().ok().filter(|f| f.is_finite()) {
        return Some(Operand::literal(f));
    }
    if text.starts_with('[') {
        return serde_json::from_str::<Value>(text).ok().map(Operand::Literal);
    }
    let mut chars = text.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    (valid_start && valid_rest).then(|| Operand::var(text))
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Recursively check a condition tree for structural problems.
///
/// Returns human-readable diagnostics; an empty list means the tree is
/// well-formed.
pub fn validate_condition(condition: &Condition) -> Vec<String> {
    let mut errors = Vec::new();
    collect_condition_errors(condition, &mut errors);
    errors
}

fn collect_condition_errors(condition: &Condition, errors: &mut Vec<String>) {
    let id = condition.display_id();
    match condition {
        Condition::Simple {
            operator,
            left,
            right,
            ..
        } => {
            if let Operator::Unknown(raw) = operator {
                errors.push(format!("condition '{id}': unknown operator '{raw}'"));
            }
            if operator.is_binary() && right.is_none() {
                errors.push(format!(
                    "condition '{id}': operator '{operator}' requires a right operand"
                ));
            }
            for operand in std::iter::once(left).chain(right.iter()) {
                match operand {
                    Operand::Variable(r) if r.var.trim().is_empty() => {
                        errors.push(format!("condition '{id}': empty variable reference"));
                    }
                    Operand::Path(p) if p.path.trim().is_empty() => {
                        errors.push(format!("condition '{id}': empty context path"));
                    }
                    _ => {}
                }
            }
            if *operator == Operator::MatchesRegex {
                if let Some(Operand::Literal(Value::String(pattern))) = right {
                    if parse_reference(pattern).is_none() {
                        if let Err(e) = Regex::new(pattern) {
                            errors.push(format!("condition '{id}': invalid regex '{pattern}': {e}"));
                        }
                    }
                }
            }
        }
        Condition::Composite {
            operator,
            conditions,
            ..
        } => {
            if conditions.is_empty() {
                errors.push(format!(
                    "condition '{id}': composite {operator:?} has no sub-conditions"
                ));
            }
            if *operator == LogicalOperator::Not && conditions.len() > 1 {
                errors.push(format!(
                    "condition '{id}': NOT negates only its first sub-condition, {} ignored",
                    conditions.len() - 1
                ));
            }
            for sub in conditions {
                collect_condition_errors(sub, errors);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> Context {
        let mut ctx = Context::new("wf", Uuid::nil())
            .with_variable("count", json!(10))
            .with_variable("name", json!("John Smith"))
            .with_variable("tags", json!(["urgent", "billing"]))
            .with_variable("order", json!({ "total": 99.5, "items": [{ "sku": "A1" }] }));
        ctx.metadata.insert("tenantId".to_string(), json!("acme"));
        ctx
    }

    fn truthy() -> Condition {
        Condition::simple(Operator::Equals, Operand::literal(1), Some(Operand::literal(1)))
    }

    fn falsy() -> Condition {
        Condition::simple(Operator::Equals, Operand::literal(1), Some(Operand::literal(2)))
    }

    fn eval(cond: &Condition) -> bool {
        ConditionEvaluator::new().evaluate(cond, &ctx()).unwrap()
    }

    fn simple(op: Operator, left: Operand, right: impl Into<Value>) -> Condition {
        Condition::simple(op, left, Some(Operand::Literal(right.into())))
    }

    // -------------------------------------------------------------------
    // Composite
    // -------------------------------------------------------------------

    #[test]
    fn and_or_truth_table() {
        assert!(!eval(&Condition::and(vec![truthy(), falsy()])));
        assert!(eval(&Condition::and(vec![truthy(), truthy()])));
        assert!(eval(&Condition::or(vec![truthy(), falsy()])));
        assert!(!eval(&Condition::or(vec![falsy(), falsy()])));
    }

    #[test]
    fn not_negates_only_first_sub_condition() {
        assert!(!eval(&Condition::not(vec![truthy()])));
        assert!(eval(&Condition::not(vec![falsy()])));
        // Trailing entries are ignored: NOT(false, true) is still true.
        assert!(eval(&Condition::not(vec![falsy(), truthy()])));
    }

    #[test]
    fn empty_composite_is_error() {
        let err = ConditionEvaluator::new()
            .evaluate(&Condition::and(vec![]).with_id("gate"), &ctx())
            .unwrap_err();
        assert!(matches!(err, EvaluationError::EmptyComposite { .. }));
        assert!(err.to_string().contains("gate"));
    }

    // -------------------------------------------------------------------
    // Operand resolution
    // -------------------------------------------------------------------

    #[test]
    fn reference_syntax_resolves_variables() {
        assert!(eval(&simple(Operator::GreaterThan, Operand::literal("${count}"), 5)));
        assert!(eval(&simple(Operator::GreaterThan, Operand::var("count"), 5)));
    }

    #[test]
    fn missing_variable_is_null_not_error() {
        assert!(eval(&Condition::simple(
            Operator::IsNull,
            Operand::literal("${nope}"),
            None
        )));
        assert!(!eval(&simple(Operator::GreaterThan, Operand::var("nope"), 0)));
    }

    #[test]
    fn dotted_paths_walk_context_and_variables() {
        assert!(eval(&simple(Operator::Equals, Operand::path("metadata.tenantId"), "acme")));
        assert!(eval(&simple(Operator::Equals, Operand::path("order.total"), 99.5)));
        assert!(eval(&simple(Operator::Equals, Operand::path("order.items.0.sku"), "A1")));
        assert!(eval(&simple(Operator::Equals, Operand::literal("${order.total}"), 99.5)));
        assert!(eval(&Condition::simple(
            Operator::IsNull,
            Operand::path("metadata.region.code"),
            None
        )));
    }

    // -------------------------------------------------------------------
    // Operators
    // -------------------------------------------------------------------

    #[test]
    fn equality_is_strict() {
        assert!(!eval(&simple(Operator::Equals, Operand::var("count"), "10")));
        assert!(eval(&simple(Operator::Equals, Operand::var("count"), 10.0)));
        assert!(eval(&simple(Operator::NotEquals, Operand::var("count"), "10")));
    }

    #[test]
    fn ordering_requires_comparable_operands() {
        assert!(eval(&simple(Operator::GreaterThanOrEqual, Operand::var("count"), 10)));
        assert!(eval(&simple(Operator::LessThan, Operand::var("count"), 11)));
        assert!(!eval(&simple(Operator::GreaterThan, Operand::var("count"), "5")));
        assert!(!eval(&simple(Operator::LessThan, Operand::var("tags"), 5)));
        assert!(eval(&simple(Operator::LessThan, Operand::literal("apple"), "banana")));
    }

    #[test]
    fn contains_for_strings_lists_and_maps() {
        assert!(eval(&simple(Operator::Contains, Operand::var("name"), "Smith")));
        assert!(eval(&simple(Operator::Contains, Operand::var("tags"), "urgent")));
        assert!(eval(&simple(Operator::Contains, Operand::var("order"), "total")));
        assert!(eval(&simple(Operator::NotContains, Operand::var("tags"), "spam")));
    }

    #[test]
    fn string_prefix_and_suffix_coerce() {
        assert!(eval(&simple(Operator::StartsWith, Operand::var("name"), "John")));
        assert!(eval(&simple(Operator::EndsWith, Operand::var("name"), "Smith")));
        assert!(eval(&simple(Operator::StartsWith, Operand::var("count"), "1")));
    }

    #[test]
    fn regex_match_and_invalid_pattern() {
        assert!(eval(&simple(Operator::MatchesRegex, Operand::var("name"), "^J\\w+ S")));
        assert!(!eval(&simple(Operator::MatchesRegex, Operand::var("name"), "^Jane")));

        let err = ConditionEvaluator::new()
            .evaluate(&simple(Operator::MatchesRegex, Operand::var("name"), "(unclosed"), &ctx())
            .unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidRegex { .. }));
    }

    #[test]
    fn membership_requires_list() {
        assert!(eval(&simple(Operator::In, Operand::literal("billing"), json!(["billing", "ops"]))));
        assert!(eval(&simple(Operator::NotIn, Operand::literal("hr"), json!(["billing", "ops"]))));
        assert!(!eval(&simple(Operator::In, Operand::literal("b"), "abc")));
        assert!(!eval(&simple(Operator::NotIn, Operand::literal("b"), "abc")));
    }

    #[test]
    fn unknown_operator_and_missing_operand_are_errors() {
        let evaluator = ConditionEvaluator::new();
        let cond = simple(Operator::Unknown("FUZZY".into()), Operand::var("count"), 1);
        assert!(matches!(
            evaluator.evaluate(&cond, &ctx()),
            Err(EvaluationError::UnknownOperator { .. })
        ));

        let cond = Condition::simple(Operator::Equals, Operand::var("count"), None);
        assert!(matches!(
            evaluator.evaluate(&cond, &ctx()),
            Err(EvaluationError::MissingOperand { .. })
        ));
    }

    // -------------------------------------------------------------------
    // Parser
    // -------------------------------------------------------------------

    #[test]
    fn parse_numeric_comparison() {
        let cond = parse_expression("x > 5").unwrap();
        assert_eq!(
            cond,
            Condition::simple(Operator::GreaterThan, Operand::var("x"), Some(Operand::literal(5)))
        );
    }

    #[test]
    fn parse_non_finite_words_as_variables() {
        let cond = parse_expression("count < infinity").unwrap();
        assert_eq!(
            cond,
            Condition::simple(Operator::LessThan, Operand::var("count"), Some(Operand::var("infinity")))
        );
        let cond = parse_expression("ratio != nan").unwrap();
        assert_eq!(
            cond,
            Condition::simple(Operator::NotEquals, Operand::var("ratio"), Some(Operand::var("nan")))
        );
        let cond = parse_expression("ratio > 1.5").unwrap();
        assert_eq!(
            cond,
            Condition::simple(Operator::GreaterThan, Operand::var("ratio"), Some(Operand::literal(1.5)))
        );
    }

    #[test]
    fn parse_quoted_string() {
        let cond = parse_expression("name == 'John'").unwrap();
        assert_eq!(
            cond,
            Condition::simple(Operator::Equals, Operand::var("name"), Some(Operand::literal("John")))
        );
    }

    #[test]
    fn parse_prefers_two_char_operators() {
        let cond = parse_expression("${count} >= 10").unwrap();
        match cond {
            Condition::Simple { operator, left, .. } => {
                assert_eq!(operator, Operator::GreaterThanOrEqual);
                assert_eq!(left, Operand::var("count"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_ignores_operators_inside_quotes() {
        let cond = parse_expression("label != 'a>b'").unwrap();
        match cond {
            Condition::Simple { operator, right, .. } => {
                assert_eq!(operator, Operator::NotEquals);
                assert_eq!(right, Some(Operand::literal("a>b")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_word_operators() {
        let cond = parse_expression("tags contains 'urgent'").unwrap();
        assert!(eval(&cond));
        let cond = parse_expression("status in [\"open\", \"pending\"]").unwrap();
        match cond {
            Condition::Simple { operator, .. } => assert_eq!(operator, Operator::In),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_expression("just words").is_err());
        assert!(parse_expression("> 5").is_err());
        assert!(parse_expression("x ==").is_err());
    }

    #[test]
    fn parsed_expression_evaluates() {
        assert!(eval(&parse_expression("count > 5").unwrap()));
        assert!(!eval(&parse_expression("name == 'Jane'").unwrap()));
    }

    // -------------------------------------------------------------------
    // Validator
    // -------------------------------------------------------------------

    #[test]
    fn validator_accepts_well_formed_tree() {
        let cond = Condition::and(vec![truthy(), Condition::not(vec![falsy()])]);
        assert!(validate_condition(&cond).is_empty());
    }

    #[test]
    fn validator_reports_nested_problems() {
        let cond = Condition::or(vec![
            Condition::simple(Operator::Unknown("LIKE".into()), Operand::var("a"), None)
                .with_id("bad-op"),
            Condition::and(vec![]).with_id("empty"),
            simple(Operator::MatchesRegex, Operand::var("a"), "[").with_id("bad-re"),
        ]);
        let errors = validate_condition(&cond);
        assert!(errors.iter().any(|e| e.contains("bad-op") && e.contains("unknown operator")));
        assert!(errors.iter().any(|e| e.contains("bad-op") && e.contains("right operand")));
        assert!(errors.iter().any(|e| e.contains("empty") && e.contains("no sub-conditions")));
        assert!(errors.iter().any(|e| e.contains("bad-re") && e.contains("invalid regex")));
    }

    #[test]
    fn validator_flags_extra_not_entries() {
        let errors = validate_condition(&Condition::not(vec![truthy(), falsy()]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("NOT negates only its first"));
    }
}
