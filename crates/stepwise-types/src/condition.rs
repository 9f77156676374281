//! Boolean condition trees used by transition guards, condition steps and loops.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A boolean expression tree.
///
/// ```yaml
/// type: composite
/// operator: AND
/// conditions:
///   - { type: simple, operator: GREATER_THAN, left: "${count}", right: 5 }
///   - { type: simple, operator: IS_NOT_NULL, left: { path: metadata.tenant } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Simple {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        operator: Operator,
        left: Operand,
        /// Not required by `IS_NULL` / `IS_NOT_NULL`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Operand>,
    },
    Composite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        operator: LogicalOperator,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
}

impl Condition {
    /// Build an anonymous simple condition.
    pub fn simple(operator: Operator, left: Operand, right: Option<Operand>) -> Self {
        Condition::Simple {
            id: None,
            operator,
            left,
            right,
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::Composite {
            id: None,
            operator: LogicalOperator::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Composite {
            id: None,
            operator: LogicalOperator::Or,
            conditions,
        }
    }

    pub fn not(conditions: Vec<Condition>) -> Self {
        Condition::Composite {
            id: None,
            operator: LogicalOperator::Not,
            conditions,
        }
    }

    /// Attach an identifier used in evaluation errors.
    pub fn with_id(mut self, new_id: impl Into<String>) -> Self {
        match &mut self {
            Condition::Simple { id, .. } | Condition::Composite { id, .. } => {
                *id = Some(new_id.into());
            }
        }
        self
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Condition::Simple { id, .. } | Condition::Composite { id, .. } => id.as_deref(),
        }
    }

    /// The ID for diagnostics, `<anonymous>` when unset.
    pub fn display_id(&self) -> &str {
        self.id().unwrap_or("<anonymous>")
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Comparison operator of a simple condition.
///
/// Operators are (de)serialized as strings. Unrecognized names are kept as
/// `Unknown` so that definitions still load and the problem surfaces as an
/// evaluation or validation error attributable to the condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    MatchesRegex,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Unknown(String),
}

impl Operator {
    /// Parse an operator name or symbol. Never fails; see [`Operator::Unknown`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EQUALS" | "==" | "===" => Operator::Equals,
            "NOT_EQUALS" | "!=" | "!==" => Operator::NotEquals,
            "GREATER_THAN" | ">" => Operator::GreaterThan,
            "LESS_THAN" | "<" => Operator::LessThan,
            "GREATER_THAN_OR_EQUAL" | ">=" => Operator::GreaterThanOrEqual,
            "LESS_THAN_OR_EQUAL" | "<=" => Operator::LessThanOrEqual,
            "CONTAINS" => Operator::Contains,
            "NOT_CONTAINS" => Operator::NotContains,
            "STARTS_WITH" | "STARTSWITH" => Operator::StartsWith,
            "ENDS_WITH" | "ENDSWITH" => Operator::EndsWith,
            "MATCHES_REGEX" | "MATCHES" => Operator::MatchesRegex,
            "IN" => Operator::In,
            "NOT_IN" => Operator::NotIn,
            "IS_NULL" => Operator::IsNull,
            "IS_NOT_NULL" => Operator::IsNotNull,
            _ => Operator::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::NotEquals => "NOT_EQUALS",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::LessThan => "LESS_THAN",
            Operator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Operator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOT_CONTAINS",
            Operator::StartsWith => "STARTS_WITH",
            Operator::EndsWith => "ENDS_WITH",
            Operator::MatchesRegex => "MATCHES_REGEX",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::IsNull => "IS_NULL",
            Operator::IsNotNull => "IS_NOT_NULL",
            Operator::Unknown(raw) => raw.as_str(),
        }
    }

    /// Whether the operator needs a right operand.
    pub fn is_binary(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Operator::parse(&raw))
    }
}

/// Logical operator of a composite condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    /// Negates the first sub-condition only.
    Not,
}

// ---------------------------------------------------------------------------
// Operands
// ---------------------------------------------------------------------------

/// One side of a simple condition.
///
/// Strings of the form `${name}` are variable references; any other JSON
/// value is a literal. `{ "var": "name" }` and `{ "path": "a.b" }` are the
/// explicit reference forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Variable(VariableRef),
    Path(ContextPath),
    Literal(Value),
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Self {
        Operand::Variable(VariableRef { var: name.into() })
    }

    pub fn path(path: impl Into<String>) -> Self {
        Operand::Path(ContextPath { path: path.into() })
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }
}

/// First-class reference to a context variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableRef {
    pub var: String,
}

/// Dotted path into the execution context (e.g. `metadata.tenantId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextPath {
    pub path: String,
}
