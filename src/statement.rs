/// Trigger statement expression trees.
///
/// A trigger's condition is authored as JSON in the trigger configuration
/// and parsed exactly once, at load time, into the typed tree defined here.
/// Parsing up front means a malformed statement is rejected when the trigger
/// is loaded, not discovered halfway through a live evaluation cycle.
///
/// Statement grammar (JSON):
///   leaf        {"field": "value", "op": ">", "threshold": 100}
///   conjunction {"all": [stmt, stmt, ...]}
///   disjunction {"any": [stmt, stmt, ...]}
///   negation    {"not": stmt}
///
/// Ordering comparators (`>`, `>=`, `<`, `<=`) require a numeric field and a
/// numeric threshold. Equality comparators (`==`, `!=`) accept numeric or
/// text operands. An unknown field, or a type mismatch between field and
/// threshold, is an evaluation *error* — never a silent "condition not met".

use std::fmt;

use serde_json::Value;

use crate::model::Reading;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors arising from parsing or evaluating a trigger statement.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The stored JSON does not conform to the statement grammar.
    MalformedStatement(String),
    /// The statement references a field the reading does not carry, or the
    /// field/threshold types are incompatible with the comparator.
    FieldMismatch { field: String, detail: String },
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::MalformedStatement(msg) => {
                write!(f, "Malformed statement: {}", msg)
            }
            EvaluationError::FieldMismatch { field, detail } => {
                write!(f, "Field mismatch on '{}': {}", field, detail)
            }
        }
    }
}

impl std::error::Error for EvaluationError {}

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
}

impl Comparator {
    /// Parses the operator symbol used in stored statements.
    pub fn parse(symbol: &str) -> Option<Comparator> {
        match symbol {
            ">" => Some(Comparator::GreaterThan),
            ">=" => Some(Comparator::GreaterThanOrEqual),
            "<" => Some(Comparator::LessThan),
            "<=" => Some(Comparator::LessThanOrEqual),
            "==" => Some(Comparator::Equal),
            "!=" => Some(Comparator::NotEqual),
            _ => None,
        }
    }

    /// The symbol written back out when serializing a statement.
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::GreaterThanOrEqual => ">=",
            Comparator::LessThan => "<",
            Comparator::LessThanOrEqual => "<=",
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
        }
    }

    /// Ordering comparators are only defined over numbers.
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Comparator::Equal | Comparator::NotEqual)
    }
}

// ---------------------------------------------------------------------------
// Threshold and field values
// ---------------------------------------------------------------------------

/// The right-hand side of a leaf comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Number(f64),
    Text(String),
}

/// A field value extracted from a `Reading` during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

// ---------------------------------------------------------------------------
// Statement tree
// ---------------------------------------------------------------------------

/// A validated trigger condition.
///
/// Combinator semantics match the usual Boolean identities: an empty `All`
/// is trivially satisfied, an empty `Any` is unsatisfiable.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerStatement {
    Compare {
        field: String,
        op: Comparator,
        threshold: Threshold,
    },
    All(Vec<TriggerStatement>),
    Any(Vec<TriggerStatement>),
    Not(Box<TriggerStatement>),
}

impl TriggerStatement {
    /// Parses a stored JSON statement into a validated tree.
    pub fn parse(value: &Value) -> Result<TriggerStatement, EvaluationError> {
        let obj = value.as_object().ok_or_else(|| {
            EvaluationError::MalformedStatement(format!(
                "expected a JSON object, got {}",
                json_kind(value)
            ))
        })?;

        if let Some(children) = obj.get("all") {
            return Self::parse_children(children, "all").map(TriggerStatement::All);
        }
        if let Some(children) = obj.get("any") {
            return Self::parse_children(children, "any").map(TriggerStatement::Any);
        }
        if let Some(inner) = obj.get("not") {
            return Ok(TriggerStatement::Not(Box::new(Self::parse(inner)?)));
        }

        // Leaf: {"field": ..., "op": ..., "threshold": ...}
        let field = obj
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EvaluationError::MalformedStatement(
                    "leaf statement requires a string 'field'".to_string(),
                )
            })?
            .to_string();

        let op_symbol = obj.get("op").and_then(Value::as_str).ok_or_else(|| {
            EvaluationError::MalformedStatement(
                "leaf statement requires a string 'op'".to_string(),
            )
        })?;
        let op = Comparator::parse(op_symbol).ok_or_else(|| {
            EvaluationError::MalformedStatement(format!("unknown operator '{}'", op_symbol))
        })?;

        let threshold = match obj.get("threshold") {
            Some(Value::Number(n)) => {
                let num = n.as_f64().ok_or_else(|| {
                    EvaluationError::MalformedStatement(format!(
                        "threshold {} is not representable as f64",
                        n
                    ))
                })?;
                Threshold::Number(num)
            }
            Some(Value::String(s)) => Threshold::Text(s.clone()),
            Some(other) => {
                return Err(EvaluationError::MalformedStatement(format!(
                    "threshold must be a number or string, got {}",
                    json_kind(other)
                )));
            }
            None => {
                return Err(EvaluationError::MalformedStatement(
                    "leaf statement requires a 'threshold'".to_string(),
                ));
            }
        };

        if op.is_ordering() && !matches!(threshold, Threshold::Number(_)) {
            return Err(EvaluationError::MalformedStatement(format!(
                "operator '{}' requires a numeric threshold",
                op.symbol()
            )));
        }

        Ok(TriggerStatement::Compare { field, op, threshold })
    }

    fn parse_children(value: &Value, key: &str) -> Result<Vec<TriggerStatement>, EvaluationError> {
        let arr = value.as_array().ok_or_else(|| {
            EvaluationError::MalformedStatement(format!("'{}' must hold an array", key))
        })?;
        arr.iter().map(Self::parse).collect()
    }

    /// Serializes the tree back to the stored JSON form. Used for the
    /// condition snapshot included in on-chain payloads.
    pub fn to_json(&self) -> Value {
        match self {
            TriggerStatement::Compare { field, op, threshold } => {
                let threshold_value = match threshold {
                    Threshold::Number(n) => serde_json::json!(n),
                    Threshold::Text(s) => Value::String(s.clone()),
                };
                serde_json::json!({
                    "field": field,
                    "op": op.symbol(),
                    "threshold": threshold_value,
                })
            }
            TriggerStatement::All(children) => {
                serde_json::json!({ "all": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            TriggerStatement::Any(children) => {
                serde_json::json!({ "any": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            TriggerStatement::Not(inner) => {
                serde_json::json!({ "not": inner.to_json() })
            }
        }
    }

    /// Evaluates the statement against one reading.
    ///
    /// Combinators short-circuit, but an evaluation error always wins over a
    /// Boolean outcome: `all` stops at the first error or `false`, `any`
    /// stops at the first error or `true`.
    pub fn evaluate(&self, reading: &Reading) -> Result<bool, EvaluationError> {
        match self {
            TriggerStatement::Compare { field, op, threshold } => {
                let value = reading.field(field).ok_or_else(|| {
                    EvaluationError::FieldMismatch {
                        field: field.clone(),
                        detail: "reading carries no such field".to_string(),
                    }
                })?;
                compare(field, &value, *op, threshold)
            }
            TriggerStatement::All(children) => {
                for child in children {
                    if !child.evaluate(reading)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TriggerStatement::Any(children) => {
                for child in children {
                    if child.evaluate(reading)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TriggerStatement::Not(inner) => Ok(!inner.evaluate(reading)?),
        }
    }
}

fn compare(
    field: &str,
    value: &FieldValue,
    op: Comparator,
    threshold: &Threshold,
) -> Result<bool, EvaluationError> {
    match (value, threshold) {
        (FieldValue::Number(v), Threshold::Number(t)) => Ok(match op {
            Comparator::GreaterThan => v > t,
            Comparator::GreaterThanOrEqual => v >= t,
            Comparator::LessThan => v < t,
            Comparator::LessThanOrEqual => v <= t,
            Comparator::Equal => v == t,
            Comparator::NotEqual => v != t,
        }),
        (FieldValue::Text(v), Threshold::Text(t)) => match op {
            Comparator::Equal => Ok(v == t),
            Comparator::NotEqual => Ok(v != t),
            _ => Err(EvaluationError::FieldMismatch {
                field: field.to_string(),
                detail: format!("operator '{}' is not defined for text fields", op.symbol()),
            }),
        },
        (FieldValue::Number(_), Threshold::Text(_)) => Err(EvaluationError::FieldMismatch {
            field: field.to_string(),
            detail: "numeric field compared against a text threshold".to_string(),
        }),
        (FieldValue::Text(_), Threshold::Number(_)) => Err(EvaluationError::FieldMismatch {
            field: field.to_string(),
            detail: "text field compared against a numeric threshold".to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
