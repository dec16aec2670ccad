//! The fixed built-in function library.
//!
//! Initialised once into a process-wide immutable table; the user
//! registry shadows it on lookup.

use std::collections::HashSet;

use lazy_static::lazy_static;

use crate::funcs::{Arity, FuncMap};
use crate::printf::sprintf;
use crate::value::Value;

lazy_static! {
    pub static ref BUILTINS: FuncMap = create();
    pub static ref BUILTIN_NAMES: HashSet<String> = BUILTINS.name_set();
}

fn create() -> FuncMap {
    let mut fm = FuncMap::new();

    fm.add_fn("range", Arity::Exact(1), |args| {
        range_values(0, as_int(&args[0])?, None)
    });
    fm.add_fn("range", Arity::Exact(2), |args| {
        range_values(as_int(&args[0])?, as_int(&args[1])?, None)
    });
    fm.add_fn("range", Arity::Exact(3), |args| {
        range_values(
            as_int(&args[0])?,
            as_int(&args[1])?,
            Some(as_int(&args[2])?),
        )
    });

    fm.add_fn("index", Arity::AtLeast(1), |args| index(&args[0], &args[1..]));

    fm.add_fn("print", Arity::AtLeast(0), |args| Ok(Value::String(print(args))));
    fm.add_fn("println", Arity::AtLeast(0), |args| {
        Ok(Value::String(println(args)))
    });
    fm.add_fn("printf", Arity::AtLeast(1), |args| {
        let format = args[0]
            .as_str()
            .ok_or_else(|| format!("printf format must be a string, got {}", args[0].type_name()))?;
        sprintf(format, &args[1..]).map(Value::String)
    });

    fm.add_fn("add", Arity::Exact(2), |args| arithmetic(&args[0], &args[1], '+'));
    fm.add_fn("sub", Arity::Exact(2), |args| arithmetic(&args[0], &args[1], '-'));
    fm.add_fn("mul", Arity::Exact(2), |args| arithmetic(&args[0], &args[1], '*'));
    fm.add_fn("div", Arity::Exact(2), |args| arithmetic(&args[0], &args[1], '/'));
    fm.add_fn("mod", Arity::Exact(2), |args| arithmetic(&args[0], &args[1], '%'));

    fm.add_fn("eq", Arity::AtLeast(2), |args| {
        Ok(Value::Bool(args[1..].iter().any(|b| &args[0] == b)))
    });
    fm.add_fn("ne", Arity::Exact(2), |args| {
        Ok(Value::Bool(args[0] != args[1]))
    });
    fm.add_fn("lt", Arity::Exact(2), |args| compare(&args[0], &args[1], "<"));
    fm.add_fn("le", Arity::Exact(2), |args| compare(&args[0], &args[1], "<="));
    fm.add_fn("gt", Arity::Exact(2), |args| compare(&args[0], &args[1], ">"));
    fm.add_fn("ge", Arity::Exact(2), |args| compare(&args[0], &args[1], ">="));

    fm.add_fn("not", Arity::Exact(1), |args| {
        Ok(Value::Bool(!args[0].is_true()))
    });
    fm.add_fn("and", Arity::AtLeast(1), |args| {
        // the first falsy argument, else the last
        for arg in args {
            if !arg.is_true() {
                return Ok(arg.clone());
            }
        }
        Ok(args[args.len() - 1].clone())
    });
    fm.add_fn("or", Arity::AtLeast(1), |args| {
        // the first truthy argument, else the last
        for arg in args {
            if arg.is_true() {
                return Ok(arg.clone());
            }
        }
        Ok(args[args.len() - 1].clone())
    });

    fm.add_fn("urlencode", Arity::Exact(1), |args| {
        if args[0].is_null() {
            return Ok(Value::Null);
        }
        let encoded: String =
            form_urlencoded::byte_serialize(args[0].to_string().as_bytes()).collect();
        Ok(Value::String(encoded))
    });
    fm.add_fn("default", Arity::Exact(2), |args| {
        // the piped value when truthy, else the fallback's rendering
        if args[1].is_true() {
            return Ok(args[1].clone());
        }
        Ok(Value::String(args[0].to_string()))
    });

    fm
}

fn as_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Null => Err("assign null to primitive type".to_string()),
        other => Err(format!("expected int, got {}", other.type_name())),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Finite integer sequence from `start` towards `stop`. The step
/// defaults to +1 when start < stop and -1 otherwise; a sequence that
/// cannot progress is empty.
fn range_values(start: i64, stop: i64, step: Option<i64>) -> Result<Value, String> {
    let step = step.unwrap_or(if start < stop { 1 } else { -1 });
    if step == 0 {
        return Err("step must not be zero".to_string());
    }
    if stop == start || (start > stop && step > 0) || (start < stop && step < 0) {
        return Ok(Value::Array(vec![]));
    }

    let mut values = vec![];
    let mut n = start;
    while (step > 0 && n < stop) || (step < 0 && n > stop) {
        values.push(Value::Int(n));
        n += step;
    }

    Ok(Value::Array(values))
}

/// Successive lookup: `index x 1 2` is x[1][2]. Array-like containers
/// index by integer, mappings by key.
fn index(container: &Value, indexes: &[Value]) -> Result<Value, String> {
    if container.is_null() {
        return Err("the array/list must not be null".to_string());
    }

    let mut current = container.clone();
    for idx in indexes {
        current = match &current {
            Value::Array(items) => {
                let i = as_int(idx)?;
                let slot = usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or_else(|| format!("index out of range: {i}"))?;
                slot.clone()
            }
            Value::Map(map) => {
                let key = idx
                    .as_str()
                    .ok_or_else(|| format!("can't index map with type {}", idx.type_name()))?;
                map.get(key).cloned().unwrap_or(Value::Null)
            }
            other => {
                return Err(format!("can't index object with type {}", other.type_name()));
            }
        };
    }

    Ok(current)
}

/// Concatenate the default renderings; a space is inserted between
/// adjacent arguments only when the left-hand one is not a string
fn print(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        out.push_str(&arg.to_string());
        if i != args.len() - 1 && !matches!(arg, Value::String(_)) {
            out.push(' ');
        }
    }

    out
}

/// Concatenate the default renderings with a space after every argument
/// and a final newline
fn println(args: &[Value]) -> String {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.to_string());
        out.push(' ');
    }
    out.push('\n');

    out
}

fn arithmetic(a: &Value, b: &Value, op: char) -> Result<Value, String> {
    let err = || {
        format!(
            "can't apply {op} to the values {a} ({}) and {b} ({})",
            a.type_name(),
            b.type_name()
        )
    };

    match (a, b) {
        (Value::String(x), Value::String(y)) if op == '+' => Ok(Value::String(format!("{x}{y}"))),
        (Value::Int(x), Value::Int(y)) => int_arithmetic(*x, *y, op),
        _ => {
            let (x, y) = match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(err()),
            };
            float_arithmetic(x, y, op)
        }
    }
}

fn int_arithmetic(x: i64, y: i64, op: char) -> Result<Value, String> {
    let result = match op {
        '+' => x.wrapping_add(y),
        '-' => x.wrapping_sub(y),
        '*' => x.wrapping_mul(y),
        '/' => {
            if y == 0 {
                return Err("can't divide the value by 0".to_string());
            }
            x.wrapping_div(y)
        }
        '%' => {
            if y == 0 {
                return Err("can't modulo the value by 0".to_string());
            }
            x.wrapping_rem(y)
        }
        _ => return Err(format!("no such operation {op}")),
    };

    Ok(Value::Int(result))
}

fn float_arithmetic(x: f64, y: f64, op: char) -> Result<Value, String> {
    let result = match op {
        '+' => x + y,
        '-' => x - y,
        '*' => x * y,
        '/' => {
            if y == 0.0 {
                return Err("can't divide the value by 0".to_string());
            }
            x / y
        }
        '%' => {
            if y == 0.0 {
                return Err("can't modulo the value by 0".to_string());
            }
            x % y
        }
        _ => return Err(format!("no such operation {op}")),
    };

    Ok(Value::Float(result))
}

/// Numeric or character-code comparison on the widest common kind
fn compare(a: &Value, b: &Value, op: &str) -> Result<Value, String> {
    let (x, y) = match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(format!(
                "can't apply {op} to the values {a} ({}) and {b} ({})",
                a.type_name(),
                b.type_name()
            ));
        }
    };
    let result = match op {
        "<" => x < y,
        "<=" => x <= y,
        ">" => x > y,
        ">=" => x >= y,
        _ => return Err(format!("no such comparison {op}")),
    };

    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Value]) -> Result<Value, String> {
        let overloads = BUILTINS.get(name).expect("unknown builtin");
        let mut last_err = None;
        for func in overloads {
            match func.invoke(args) {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_default())
    }

    #[test]
    fn range_forms() {
        assert_eq!(
            Ok(Value::from(vec![0, 1, 2])),
            call("range", &[Value::Int(3)])
        );
        assert_eq!(
            Ok(Value::from(vec![2, 3])),
            call("range", &[Value::Int(2), Value::Int(4)])
        );
        assert_eq!(
            Ok(Value::from(vec![4, 3])),
            call("range", &[Value::Int(4), Value::Int(2)])
        );
        assert_eq!(
            Ok(Value::from(vec![0, 2])),
            call("range", &[Value::Int(0), Value::Int(4), Value::Int(2)])
        );
    }

    #[test]
    fn range_empty_and_errors() {
        assert_eq!(Ok(Value::Array(vec![])), call("range", &[Value::Int(0)]));
        assert!(call("range", &[Value::Int(0), Value::Int(4), Value::Int(0)]).is_err());
    }

    #[test]
    fn index_nested() {
        let data = Value::from(serde_json::json!({"users": [{"name": "Jo"}]}));

        assert_eq!(
            Ok(Value::from("Jo")),
            call(
                "index",
                &[
                    data,
                    Value::from("users"),
                    Value::Int(0),
                    Value::from("name")
                ]
            )
        );
    }

    #[test]
    fn index_out_of_range() {
        let data = Value::from(vec![1, 2]);

        assert_eq!(
            Err("index out of range: 5".to_string()),
            call("index", &[data, Value::Int(5)])
        );
    }

    #[test]
    fn print_spaces_after_non_strings() {
        assert_eq!(
            Ok(Value::from("a1 b")),
            call(
                "print",
                &[Value::from("a"), Value::Int(1), Value::from("b")]
            )
        );
    }

    #[test]
    fn println_spaces_everything() {
        assert_eq!(
            Ok(Value::from("a 1 \n")),
            call("println", &[Value::from("a"), Value::Int(1)])
        );
    }

    #[test]
    fn arithmetic_dispatch() {
        assert_eq!(Ok(Value::Int(5)), call("add", &[Value::Int(2), Value::Int(3)]));
        assert_eq!(
            Ok(Value::Float(2.5)),
            call("add", &[Value::Int(2), Value::Float(0.5)])
        );
        assert_eq!(
            Ok(Value::from("ab")),
            call("add", &[Value::from("a"), Value::from("b")])
        );
        assert_eq!(Ok(Value::Int(2)), call("div", &[Value::Int(7), Value::Int(3)]));
        assert_eq!(Ok(Value::Int(1)), call("mod", &[Value::Int(7), Value::Int(3)]));
    }

    #[test]
    fn division_by_zero() {
        assert!(call("div", &[Value::Int(1), Value::Int(0)]).is_err());
        assert!(call("mod", &[Value::Int(1), Value::Int(0)]).is_err());
        assert!(call("div", &[Value::Float(1.0), Value::Float(0.0)]).is_err());
    }

    #[test]
    fn arithmetic_type_mismatch() {
        let err = call("add", &[Value::from("a"), Value::Int(1)]).unwrap_err();

        assert_eq!(
            "can't apply + to the values a (string) and 1 (int)",
            err
        );
    }

    #[test]
    fn equality_matches_any_comparator() {
        assert_eq!(
            Ok(Value::Bool(true)),
            call("eq", &[Value::Int(2), Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            Ok(Value::Bool(false)),
            call("eq", &[Value::Int(2), Value::Int(1)])
        );
        assert!(call("eq", &[Value::Int(2)]).is_err());
        assert_eq!(
            Ok(Value::Bool(true)),
            call("ne", &[Value::Int(2), Value::Int(1)])
        );
    }

    #[test]
    fn comparisons() {
        assert_eq!(
            Ok(Value::Bool(true)),
            call("lt", &[Value::Int(1), Value::Float(1.5)])
        );
        assert_eq!(
            Ok(Value::Bool(true)),
            call("ge", &[Value::Int(2), Value::Int(2)])
        );
        assert!(call("lt", &[Value::from("a"), Value::Int(1)]).is_err());
    }

    #[test]
    fn logic() {
        assert_eq!(Ok(Value::Bool(false)), call("not", &[Value::Int(1)]));
        assert_eq!(
            Ok(Value::Int(0)),
            call("and", &[Value::Int(1), Value::Int(0), Value::Int(2)])
        );
        assert_eq!(
            Ok(Value::Int(2)),
            call("and", &[Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            Ok(Value::Int(1)),
            call("or", &[Value::Int(0), Value::Int(1), Value::Int(0)])
        );
        assert_eq!(
            Ok(Value::Int(0)),
            call("or", &[Value::Int(0), Value::Int(0)])
        );
    }

    #[test]
    fn urlencode_form_encodes() {
        assert_eq!(
            Ok(Value::from("test%2Buser%40carepay.com")),
            call("urlencode", &[Value::from("test+user@carepay.com")])
        );
        assert_eq!(
            Ok(Value::from("a+b")),
            call("urlencode", &[Value::from("a b")])
        );
        assert_eq!(Ok(Value::Null), call("urlencode", &[Value::Null]));
    }

    #[test]
    fn default_returns_piped_value_when_truthy() {
        assert_eq!(
            Ok(Value::from("john@doe.com")),
            call(
                "default",
                &[Value::from("user@host.com"), Value::from("john@doe.com")]
            )
        );
        assert_eq!(
            Ok(Value::from("user@host.com")),
            call("default", &[Value::from("user@host.com"), Value::Null])
        );
    }
}
