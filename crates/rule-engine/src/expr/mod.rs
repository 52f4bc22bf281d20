//! Data-driven expression evaluator.
//!
//! Expressions are JSON: an object with a single key is an operator call
//! (`{"<=": [{"var": "properties.health"}, 0]}`), arrays evaluate
//! element-wise and everything else is a literal. Evaluation never mutates
//! its input; every result is an owned value.
//!
//! # Example
//!
//! ```
//! use rule_engine::Evaluator;
//! use serde_json::json;
//!
//! let evaluator = Evaluator::new();
//! let data = json!({ "entities": [{ "hp": 0 }, { "hp": 5 }] });
//! let expr = json!({ "filter": [{ "var": "entities" }, { "<=": [{ "var": "hp" }, 0] }] });
//! assert_eq!(evaluator.evaluate(&expr, &data).unwrap(), json!([{ "hp": 0 }]));
//! ```

mod ops;

use std::borrow::Cow;

use hashbrown::HashMap;
use serde_json::{Number, Value};
use thiserror::Error;

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("'{op}' expects {expected}")]
    Arity { op: &'static str, expected: &'static str },

    #[error("'{op}': {message}")]
    Type { op: &'static str, message: String },

    #[error("division by zero")]
    DivisionByZero,
}

/// Result type for evaluation.
pub type EvalResult = Result<Value, EvalError>;

/// An operator implementation.
///
/// Receives its arguments unevaluated so it can short-circuit or rebind
/// the data context (as `filter` and `map` do).
pub type Operator = fn(&Evaluator, &[Value], &Value) -> EvalResult;

/// Operator table.
#[derive(Clone)]
pub struct Operators {
    table: HashMap<&'static str, Operator>,
}

impl Operators {
    /// An empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Register or replace an operator.
    pub fn register(&mut self, name: &'static str, op: Operator) {
        self.table.insert(name, op);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Operator> {
        self.table.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.keys().copied()
    }
}

impl Default for Operators {
    fn default() -> Self {
        let mut ops = Self::empty();
        ops::register_defaults(&mut ops);
        ops
    }
}

/// Side-effect free expression evaluator.
#[derive(Clone, Default)]
pub struct Evaluator {
    operators: Operators,
}

impl Evaluator {
    /// An evaluator with the default operator set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An evaluator with a caller-provided operator set.
    #[must_use]
    pub const fn with_operators(operators: Operators) -> Self {
        Self { operators }
    }

    #[must_use]
    pub const fn operators(&self) -> &Operators {
        &self.operators
    }

    /// Evaluate `expr` against `data`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] for unknown operators and ill-typed arguments.
    pub fn evaluate(&self, expr: &Value, data: &Value) -> EvalResult {
        match expr {
            Value::Object(map) if map.len() == 1 => {
                let Some((name, args)) = map.iter().next() else {
                    return Ok(Value::Null);
                };
                let op = self
                    .operators
                    .get(name)
                    .ok_or_else(|| EvalError::UnknownOperator(name.clone()))?;
                let args = match args {
                    Value::Array(items) => items.as_slice(),
                    single => std::slice::from_ref(single),
                };
                op(self, args, data)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.evaluate(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            literal => Ok(literal.clone()),
        }
    }

    /// Evaluate `expr`, borrowing from `data` when `expr` is a plain
    /// `{"var": "<path>"}` lookup.
    ///
    /// Collection operators use this so filtering a large list does not
    /// copy it first.
    ///
    /// # Errors
    ///
    /// Same as [`Evaluator::evaluate`].
    pub fn resolve<'d>(&self, expr: &Value, data: &'d Value) -> Result<Cow<'d, Value>, EvalError> {
        if let Some(path) = plain_var(expr) {
            return Ok(lookup(data, path).map_or(Cow::Owned(Value::Null), Cow::Borrowed));
        }
        self.evaluate(expr, data).map(Cow::Owned)
    }
}

/// The literal path of `{"var": "a.b"}` / `{"var": ["a.b"]}` without a default.
fn plain_var(expr: &Value) -> Option<&str> {
    let Value::Object(map) = expr else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }
    match map.get("var")? {
        Value::String(path) => Some(path),
        Value::Array(args) if args.len() == 1 => args[0].as_str(),
        _ => None,
    }
}

/// Walk a dotted path through objects and arrays. An empty path is `data`.
#[must_use]
pub fn lookup<'d>(data: &'d Value, path: &str) -> Option<&'d Value> {
    if path.is_empty() {
        return Some(data);
    }
    path.split('.').try_fold(data, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// JSON-logic truthiness: `false`, `null`, `0`, `""` and `[]` are falsy.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Numeric coercion: numbers, numeric strings, booleans and null.
#[must_use]
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Build a JSON number, preferring an integer representation for whole values.
#[must_use]
pub fn number(value: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_SAFE {
        return Value::from(value as i64);
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
