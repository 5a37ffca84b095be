//! Small expression language used by control steps and step conditions.
//!
//! `<operand> [<op> <operand>]` or `!<operand>`, where an operand is a reference
//! (`step:<id>:<key>`, `trigger.<path>`, `env.<NAME>`) or a JSON literal. Bare words
//! on the right-hand side are read as strings.

use runway_types::StepContext;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    #[error("empty predicate")]
    Empty,
    #[error("malformed predicate '{0}'")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Contains,
}

const OPERATORS: [(&str, Comparison); 7] = [
    (" == ", Comparison::Eq),
    (" != ", Comparison::Ne),
    (" >= ", Comparison::Ge),
    (" <= ", Comparison::Le),
    (" > ", Comparison::Gt),
    (" < ", Comparison::Lt),
    (" contains ", Comparison::Contains),
];

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Ref(String),
}

impl Operand {
    fn parse(raw: &str) -> Result<Self, PredicateError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PredicateError::Empty);
        }
        if raw.starts_with("step:") || raw.starts_with("trigger.") || raw.starts_with("env.") {
            return Ok(Operand::Ref(raw.to_string()));
        }
        Ok(Operand::Literal(
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        ))
    }

    fn resolve(&self, ctx: &StepContext) -> Value {
        match self {
            Operand::Literal(v) => v.clone(),
            Operand::Ref(r) => {
                if let Some(path) = r.strip_prefix("trigger.") {
                    path.split('.')
                        .try_fold(&ctx.trigger_payload, |v, key| v.get(key))
                        .cloned()
                        .unwrap_or(Value::Null)
                } else if let Some(name) = r.strip_prefix("env.") {
                    ctx.environment
                        .get(name)
                        .map(|v| Value::String(v.clone()))
                        .unwrap_or(Value::Null)
                } else {
                    ctx.resolve(r).cloned().unwrap_or(Value::Null)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    negate: bool,
    left: Operand,
    comparison: Option<(Comparison, Operand)>,
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(PredicateError::Empty);
        }
        for (token, cmp) in OPERATORS {
            if let Some((left, right)) = source.split_once(token) {
                if left.trim().is_empty() || right.trim().is_empty() {
                    return Err(PredicateError::Malformed(source.to_string()));
                }
                return Ok(Self {
                    negate: false,
                    left: Operand::parse(left)?,
                    comparison: Some((cmp, Operand::parse(right)?)),
                });
            }
        }
        let (negate, rest) = match source.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, source),
        };
        if rest.trim().contains(char::is_whitespace) && !rest.trim().starts_with('"') {
            return Err(PredicateError::Malformed(source.to_string()));
        }
        Ok(Self {
            negate,
            left: Operand::parse(rest)?,
            comparison: None,
        })
    }

    pub fn evaluate(&self, ctx: &StepContext) -> bool {
        let left = self.left.resolve(ctx);
        let result = match &self.comparison {
            None => truthy(&left),
            Some((cmp, right)) => compare(*cmp, &left, &right.resolve(ctx)),
        };
        result != self.negate
    }
}

/// Parses and evaluates in one go; malformed input evaluates to false.
pub fn evaluate(source: &str, ctx: &StepContext) -> bool {
    Predicate::parse(source)
        .map(|p| p.evaluate(ctx))
        .unwrap_or(false)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(cmp: Comparison, left: &Value, right: &Value) -> bool {
    let numbers = as_number(left).zip(as_number(right));
    match cmp {
        Comparison::Eq => numbers.map_or_else(|| left == right, |(l, r)| l == r),
        Comparison::Ne => numbers.map_or_else(|| left != right, |(l, r)| l != r),
        Comparison::Contains => match left {
            Value::String(s) => right.as_str().is_some_and(|needle| s.contains(needle)),
            Value::Array(items) => items.contains(right),
            Value::Object(map) => right.as_str().is_some_and(|k| map.contains_key(k)),
            _ => false,
        },
        ordering => {
            let ord = match numbers {
                Some((l, r)) => l.partial_cmp(&r),
                None => match (left.as_str(), right.as_str()) {
                    (Some(l), Some(r)) => Some(l.cmp(r)),
                    _ => None,
                },
            };
            let Some(ord) = ord else {
                return false;
            };
            match ordering {
                Comparison::Gt => ord.is_gt(),
                Comparison::Ge => ord.is_ge(),
                Comparison::Lt => ord.is_lt(),
                Comparison::Le => ord.is_le(),
                _ => false,
            }
        }
    }
}
