//! Predicate AST for routing rules and the event-pattern compiler.
//!
//! Predicates are data. They are evaluated against the JSON view of an event
//! (`source`, `detailType`, `detail`, ...) by walking dot-separated paths.
//! Event patterns in the bus's JSON pattern language compile into the same AST:
//!
//! ```json
//! {"source": [{"prefix": "fraudcheck.orderpipe"}],
//!  "detail": {"fraudChecks": {"fraudScore": [{"numeric": [">", 80]}]}}}
//! ```

use crate::RuleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `=`
    Eq,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Gte),
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Lte),
            "=" => Some(Comparison::Eq),
            _ => None,
        }
    }

    fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Gte => left >= right,
            Comparison::Lt => left < right,
            Comparison::Lte => left <= right,
            Comparison::Eq => left == right,
        }
    }
}

/// Structural predicate over an event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Always true
    Always,
    /// The path resolves to a non-null value
    Exists { path: String },
    /// The path resolves to a string starting with `value`
    Prefix { path: String, value: String },
    /// The path resolves to a number strictly greater than `threshold`
    GreaterThan { path: String, threshold: f64 },
    /// The path resolves to a number satisfying the comparison
    Numeric {
        path: String,
        comparison: Comparison,
        value: f64,
    },
    /// The path resolves to a value equal to `value` (numbers compare numerically)
    Equals { path: String, value: Value },
    /// Every predicate holds
    And { all: Vec<Predicate> },
    /// At least one predicate holds
    Or { any: Vec<Predicate> },
    /// The predicate does not hold
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    /// Evaluate against a JSON document.
    pub fn evaluate(&self, root: &Value) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Exists { path } => resolve(root, path).is_some_and(|v| !v.is_null()),
            Predicate::Prefix { path, value } => resolve(root, path)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(value.as_str())),
            Predicate::GreaterThan { path, threshold } => resolve(root, path)
                .and_then(Value::as_f64)
                .is_some_and(|n| n > *threshold),
            Predicate::Numeric {
                path,
                comparison,
                value,
            } => resolve(root, path)
                .and_then(Value::as_f64)
                .is_some_and(|n| comparison.holds(n, *value)),
            Predicate::Equals { path, value } => {
                resolve(root, path).is_some_and(|found| values_equal(found, value))
            }
            Predicate::And { all } => all.iter().all(|p| p.evaluate(root)),
            Predicate::Or { any } => any.iter().any(|p| p.evaluate(root)),
            Predicate::Not { predicate } => !predicate.evaluate(root),
        }
    }

    /// Re-root every path under `prefix` (e.g. `fraudChecks.fraudScore` -> `detail.fraudChecks.fraudScore`).
    pub fn rooted_at(self, prefix: &str) -> Self {
        let join = |path: String| {
            if path.is_empty() {
                prefix.to_string()
            } else {
                format!("{}.{}", prefix, path)
            }
        };

        match self {
            Predicate::Always => Predicate::Always,
            Predicate::Exists { path } => Predicate::Exists { path: join(path) },
            Predicate::Prefix { path, value } => Predicate::Prefix {
                path: join(path),
                value,
            },
            Predicate::GreaterThan { path, threshold } => Predicate::GreaterThan {
                path: join(path),
                threshold,
            },
            Predicate::Numeric {
                path,
                comparison,
                value,
            } => Predicate::Numeric {
                path: join(path),
                comparison,
                value,
            },
            Predicate::Equals { path, value } => Predicate::Equals {
                path: join(path),
                value,
            },
            Predicate::And { all } => Predicate::And {
                all: all.into_iter().map(|p| p.rooted_at(prefix)).collect(),
            },
            Predicate::Or { any } => Predicate::Or {
                any: any.into_iter().map(|p| p.rooted_at(prefix)).collect(),
            },
            Predicate::Not { predicate } => Predicate::Not {
                predicate: Box::new(predicate.rooted_at(prefix)),
            },
        }
    }

    /// Check paths, thresholds and combinator arity.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::Always => Ok(()),
            Predicate::Exists { path }
            | Predicate::Prefix { path, .. }
            | Predicate::Equals { path, .. } => check_path(path),
            Predicate::GreaterThan { path, threshold: value }
            | Predicate::Numeric { path, value, .. } => {
                check_path(path)?;
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(format!("threshold for '{}' must be a finite number", path))
                }
            }
            Predicate::And { all: predicates } | Predicate::Or { any: predicates } => {
                if predicates.is_empty() {
                    return Err("and/or needs at least one predicate".to_string());
                }
                predicates.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not { predicate } => predicate.validate(),
        }
    }

    /// Combine predicates with AND, flattening trivial cases.
    pub fn all(mut predicates: Vec<Predicate>) -> Predicate {
        predicates.retain(|p| *p != Predicate::Always);
        match predicates.len() {
            0 => Predicate::Always,
            1 => predicates.remove(0),
            _ => Predicate::And { all: predicates },
        }
    }
}

fn check_path(path: &str) -> Result<(), String> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        Err(format!("invalid path '{}'", path))
    } else {
        Ok(())
    }
}

fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |value, key| value.get(key))
}

fn values_equal(found: &Value, expected: &Value) -> bool {
    match (found.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => found == expected,
    }
}

/// Compile a JSON event pattern into a predicate over the event's JSON view.
pub fn compile_event_pattern(rule: &str, pattern: &str) -> Result<Predicate, RuleError> {
    let invalid = |message: String| RuleError::InvalidPattern {
        rule: rule.to_string(),
        message,
    };

    let value: Value = serde_json::from_str(pattern).map_err(|e| invalid(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| invalid("pattern must be a JSON object".to_string()))?;
    if object.is_empty() {
        return Err(invalid("pattern must not be empty".to_string()));
    }

    compile_object(object, "").map_err(invalid)
}

fn compile_object(object: &serde_json::Map<String, Value>, base: &str) -> Result<Predicate, String> {
    let mut predicates = Vec::with_capacity(object.len());

    for (key, value) in object {
        // The bus's pattern language spells the field `detail-type`.
        let key = if base.is_empty() && key == "detail-type" {
            "detailType"
        } else {
            key.as_str()
        };
        let path = if base.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", base, key)
        };

        let predicate = match value {
            Value::Object(nested) => compile_object(nested, &path)?,
            Value::Array(matchers) => compile_matchers(matchers, &path)?,
            other => {
                return Err(format!(
                    "value for '{}' must be an array or object, got {}",
                    path, other
                ))
            }
        };
        predicates.push(predicate);
    }

    Ok(Predicate::all(predicates))
}

fn compile_matchers(matchers: &[Value], path: &str) -> Result<Predicate, String> {
    if matchers.is_empty() {
        return Err(format!("matcher list for '{}' is empty", path));
    }

    let mut any = matchers
        .iter()
        .map(|matcher| compile_matcher(matcher, path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if any.len() == 1 {
        any.remove(0)
    } else {
        Predicate::Or { any }
    })
}

fn compile_matcher(matcher: &Value, path: &str) -> Result<Predicate, String> {
    let object = match matcher {
        Value::Object(object) => object,
        Value::Array(_) => return Err(format!("nested array in matcher for '{}'", path)),
        literal => {
            return Ok(Predicate::Equals {
                path: path.to_string(),
                value: literal.clone(),
            })
        }
    };

    if object.len() != 1 {
        return Err(format!("matcher for '{}' must have exactly one operator", path));
    }
    let (op, operand) = object
        .iter()
        .next()
        .ok_or_else(|| format!("empty matcher for '{}'", path))?;

    match op.as_str() {
        "prefix" => {
            let prefix = operand
                .as_str()
                .ok_or_else(|| format!("prefix for '{}' must be a string", path))?;
            Ok(Predicate::Prefix {
                path: path.to_string(),
                value: prefix.to_string(),
            })
        }
        "exists" => {
            let exists = operand
                .as_bool()
                .ok_or_else(|| format!("exists for '{}' must be a boolean", path))?;
            let predicate = Predicate::Exists {
                path: path.to_string(),
            };
            Ok(if exists {
                predicate
            } else {
                Predicate::Not {
                    predicate: Box::new(predicate),
                }
            })
        }
        "numeric" => compile_numeric(operand, path),
        other => Err(format!("unsupported operator '{}' for '{}'", other, path)),
    }
}

fn compile_numeric(operand: &Value, path: &str) -> Result<Predicate, String> {
    let terms = operand
        .as_array()
        .filter(|terms| !terms.is_empty() && terms.len() % 2 == 0)
        .ok_or_else(|| format!("numeric for '{}' must be [op, number, ...]", path))?;

    let mut all = Vec::with_capacity(terms.len() / 2);
    for pair in terms.chunks(2) {
        let comparison = pair[0]
            .as_str()
            .and_then(Comparison::parse)
            .ok_or_else(|| format!("bad numeric operator {} for '{}'", pair[0], path))?;
        let value = pair[1]
            .as_f64()
            .ok_or_else(|| format!("numeric operand {} for '{}' is not a number", pair[1], path))?;

        all.push(match comparison {
            Comparison::Gt => Predicate::GreaterThan {
                path: path.to_string(),
                threshold: value,
            },
            comparison => Predicate::Numeric {
                path: path.to_string(),
                comparison,
                value,
            },
        });
    }

    Ok(Predicate::all(all))
}
