//! Default operator set.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{EvalError, EvalResult, Evaluator, Operators, lookup, number, to_number, truthy};

pub(super) fn register_defaults(ops: &mut Operators) {
    // Data access
    ops.register("var", var);
    ops.register("missing", missing);

    // Logic
    ops.register("if", if_);
    ops.register("?:", if_);
    ops.register("and", and);
    ops.register("or", or);
    ops.register("!", not);
    ops.register("!!", not_not);

    // Comparison
    ops.register("==", loose_eq);
    ops.register("!=", loose_ne);
    ops.register("===", strict_eq);
    ops.register("!==", strict_ne);
    ops.register("<", lt);
    ops.register("<=", le);
    ops.register(">", gt);
    ops.register(">=", ge);

    // Arithmetic
    ops.register("+", add);
    ops.register("-", sub);
    ops.register("*", mul);
    ops.register("/", div);
    ops.register("%", rem);
    ops.register("min", min);
    ops.register("max", max);

    // Strings and collections
    ops.register("cat", cat);
    ops.register("substr", substr);
    ops.register("in", in_);
    ops.register("merge", merge);
    ops.register("count", count);

    // Iteration
    ops.register("map", map);
    ops.register("filter", filter);
    ops.register("reduce", reduce);
    ops.register("all", all);
    ops.register("some", some);
    ops.register("none", none);
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&Value::Null)
}

fn eval_all(e: &Evaluator, args: &[Value], data: &Value) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|a| e.evaluate(a, data)).collect()
}

fn numeric(op: &'static str, value: &Value) -> Result<f64, EvalError> {
    to_number(value).ok_or_else(|| EvalError::Type {
        op,
        message: format!("expected a number, got {value}"),
    })
}

// ==================== Data access ====================

fn var(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let path = e.evaluate(arg(args, 0), data)?;
    let found = match &path {
        Value::Null => Some(data),
        Value::String(p) => lookup(data, p),
        Value::Number(n) => lookup(data, &n.to_string()),
        other => {
            return Err(EvalError::Type {
                op: "var",
                message: format!("path must be a string, got {other}"),
            });
        }
    };

    match found {
        Some(Value::Null) | None if args.len() > 1 => e.evaluate(&args[1], data),
        Some(value) => Ok(value.clone()),
        None => Ok(Value::Null),
    }
}

fn missing(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let mut keys = eval_all(e, args, data)?;
    if let [Value::Array(inner)] = keys.as_mut_slice() {
        keys = std::mem::take(inner);
    }

    let absent = keys
        .into_iter()
        .filter(|key| {
            let path = match key {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lookup(data, &path).is_none_or(Value::is_null)
        })
        .collect();
    Ok(Value::Array(absent))
}

// ==================== Logic ====================

fn if_(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    for pair in args.chunks(2) {
        match pair {
            [condition, then] => {
                if truthy(&e.evaluate(condition, data)?) {
                    return e.evaluate(then, data);
                }
            }
            [otherwise] => return e.evaluate(otherwise, data),
            _ => {}
        }
    }
    Ok(Value::Null)
}

fn and(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let mut last = Value::Null;
    for a in args {
        last = e.evaluate(a, data)?;
        if !truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn or(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let mut last = Value::Null;
    for a in args {
        last = e.evaluate(a, data)?;
        if truthy(&last) {
            return Ok(last);
        }
    }
    Ok(last)
}

fn not(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    Ok(Value::Bool(!truthy(&e.evaluate(arg(args, 0), data)?)))
}

fn not_not(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    Ok(Value::Bool(truthy(&e.evaluate(arg(args, 0), data)?)))
}

// ==================== Comparison ====================

/// Equality with numeric coercion between numbers, numeric strings and booleans.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn strictly_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn binary(e: &Evaluator, op: &'static str, args: &[Value], data: &Value) -> Result<(Value, Value), EvalError> {
    if args.len() != 2 {
        return Err(EvalError::Arity {
            op,
            expected: "two arguments",
        });
    }
    Ok((e.evaluate(&args[0], data)?, e.evaluate(&args[1], data)?))
}

fn loose_eq(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (a, b) = binary(e, "==", args, data)?;
    Ok(Value::Bool(loosely_equal(&a, &b)))
}

fn loose_ne(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (a, b) = binary(e, "!=", args, data)?;
    Ok(Value::Bool(!loosely_equal(&a, &b)))
}

fn strict_eq(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (a, b) = binary(e, "===", args, data)?;
    Ok(Value::Bool(strictly_equal(&a, &b)))
}

fn strict_ne(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (a, b) = binary(e, "!==", args, data)?;
    Ok(Value::Bool(!strictly_equal(&a, &b)))
}

/// Order two values: strings lexically, everything else numerically.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}

/// Shared body of `<`, `<=`, `>`, `>=`; the three-argument form of `<` and
/// `<=` tests `a < b < c`.
fn compare(
    e: &Evaluator,
    op: &'static str,
    args: &[Value],
    data: &Value,
    accept: fn(Ordering) -> bool,
    allow_between: bool,
) -> EvalResult {
    let max = if allow_between { 3 } else { 2 };
    if args.len() < 2 || args.len() > max {
        return Err(EvalError::Arity {
            op,
            expected: if allow_between {
                "two or three arguments"
            } else {
                "two arguments"
            },
        });
    }

    let values = eval_all(e, args, data)?;
    let ok = values
        .windows(2)
        .all(|w| order(&w[0], &w[1]).is_some_and(accept));
    Ok(Value::Bool(ok))
}

fn lt(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    compare(e, "<", args, data, Ordering::is_lt, true)
}

fn le(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    compare(e, "<=", args, data, Ordering::is_le, true)
}

fn gt(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    compare(e, ">", args, data, Ordering::is_gt, false)
}

fn ge(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    compare(e, ">=", args, data, Ordering::is_ge, false)
}

// ==================== Arithmetic ====================

fn add(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let mut sum = 0.0;
    for value in eval_all(e, args, data)? {
        sum += numeric("+", &value)?;
    }
    Ok(number(sum))
}

fn sub(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let values = eval_all(e, args, data)?;
    match values.as_slice() {
        [a] => Ok(number(-numeric("-", a)?)),
        [a, b] => Ok(number(numeric("-", a)? - numeric("-", b)?)),
        _ => Err(EvalError::Arity {
            op: "-",
            expected: "one or two arguments",
        }),
    }
}

fn mul(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let mut product = 1.0;
    for value in eval_all(e, args, data)? {
        product *= numeric("*", &value)?;
    }
    Ok(number(product))
}

fn div(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (a, b) = binary(e, "/", args, data)?;
    let divisor = numeric("/", &b)?;
    if divisor == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok(number(numeric("/", &a)? / divisor))
}

fn rem(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (a, b) = binary(e, "%", args, data)?;
    let divisor = numeric("%", &b)?;
    if divisor == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok(number(numeric("%", &a)? % divisor))
}

fn extreme(e: &Evaluator, op: &'static str, args: &[Value], data: &Value, pick: fn(f64, f64) -> f64) -> EvalResult {
    let mut best: Option<f64> = None;
    for value in eval_all(e, args, data)? {
        let n = numeric(op, &value)?;
        best = Some(best.map_or(n, |b| pick(b, n)));
    }
    Ok(best.map_or(Value::Null, number))
}

fn min(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    extreme(e, "min", args, data, f64::min)
}

fn max(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    extreme(e, "max", args, data, f64::max)
}

// ==================== Strings and collections ====================

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cat(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let values = eval_all(e, args, data)?;
    Ok(Value::String(values.iter().map(stringify).collect()))
}

fn substr(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let values = eval_all(e, args, data)?;
    let text: Vec<char> = stringify(arg(&values, 0)).chars().collect();
    let len = text.len() as i64;

    let start = to_number(arg(&values, 1)).unwrap_or(0.0) as i64;
    let start = if start < 0 { (len + start).max(0) } else { start.min(len) };

    let end = match values.get(2).and_then(to_number) {
        Some(n) if n < 0.0 => len.saturating_add(n as i64).clamp(start, len),
        Some(n) => start.saturating_add(n as i64).clamp(start, len),
        None => len,
    };

    Ok(Value::String(text[start as usize..end as usize].iter().collect()))
}

fn in_(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let (needle, haystack) = binary(e, "in", args, data)?;
    let found = match &haystack {
        Value::Array(items) => items.iter().any(|item| strictly_equal(item, &needle)),
        Value::String(s) => s.contains(&stringify(&needle)),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn merge(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let mut merged = Vec::new();
    for value in eval_all(e, args, data)? {
        match value {
            Value::Array(items) => merged.extend(items),
            other => merged.push(other),
        }
    }
    Ok(Value::Array(merged))
}

fn count(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let list = e.resolve(arg(args, 0), data)?;
    let n = match list.as_ref() {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    };
    Ok(Value::from(n))
}

// ==================== Iteration ====================

/// Items of the collection argument; anything but an array iterates nothing.
fn items(list: &Value) -> &[Value] {
    match list {
        Value::Array(items) => items,
        _ => &[],
    }
}

fn map(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let list = e.resolve(arg(args, 0), data)?;
    let body = arg(args, 1);
    items(&list)
        .iter()
        .map(|item| e.evaluate(body, item))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn filter(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let list = e.resolve(arg(args, 0), data)?;
    let predicate = arg(args, 1);
    let mut kept = Vec::new();
    for item in items(&list) {
        if truthy(&e.evaluate(predicate, item)?) {
            kept.push(item.clone());
        }
    }
    Ok(Value::Array(kept))
}

fn reduce(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let list = e.resolve(arg(args, 0), data)?;
    let body = arg(args, 1);
    let mut accumulator = e.evaluate(arg(args, 2), data)?;

    let mut context = Value::Object(Map::with_capacity(2));
    for item in items(&list) {
        if let Value::Object(scope) = &mut context {
            scope.insert("current".to_string(), item.clone());
            scope.insert("accumulator".to_string(), accumulator);
        }
        accumulator = e.evaluate(body, &context)?;
    }
    Ok(accumulator)
}

fn all(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let list = e.resolve(arg(args, 0), data)?;
    let list = items(&list);
    if list.is_empty() {
        return Ok(Value::Bool(false));
    }
    for item in list {
        if !truthy(&e.evaluate(arg(args, 1), item)?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn some(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    let list = e.resolve(arg(args, 0), data)?;
    for item in items(&list) {
        if truthy(&e.evaluate(arg(args, 1), item)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn none(e: &Evaluator, args: &[Value], data: &Value) -> EvalResult {
    some(e, args, data).map(|found| Value::Bool(!truthy(&found)))
}
