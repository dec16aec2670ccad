//! Name → overload-set registry for template-callable functions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// How many arguments a callable accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Fixed leading parameters plus trailing varargs
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(want) => n == want,
            Arity::AtLeast(want) => n >= want,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n} args"),
            Arity::AtLeast(n) => write!(f, "at least {n} args"),
        }
    }
}

type Callable = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// One callable of an overload set: an arity contract plus the typed
/// trampoline that coerces its arguments
#[derive(Clone)]
pub struct Func {
    arity: Arity,
    call: Callable,
}

impl Func {
    pub fn new<F>(arity: Arity, call: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            arity,
            call: Arc::new(call),
        }
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Invoke with an argument-count check; the failure reason feeds the
    /// dispatcher's aggregated error
    pub fn invoke(&self, args: &[Value]) -> Result<Value, String> {
        if !self.arity.accepts(args.len()) {
            return Err(format!(
                "wrong number of args: want {}, got {}",
                self.arity,
                args.len()
            ));
        }

        (self.call)(args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("arity", &self.arity).finish()
    }
}

/// Maps user-visible names to ordered overload sets, tried in
/// registration order
#[derive(Clone, Debug, Default)]
pub struct FuncMap {
    funcs: HashMap<String, Vec<Func>>,
}

impl FuncMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one callable to `name`'s overload set
    pub fn add(&mut self, name: impl Into<String>, func: Func) -> &mut Self {
        self.funcs.entry(name.into()).or_default().push(func);
        self
    }

    /// Register a plain function under `name`
    pub fn add_fn<F>(&mut self, name: impl Into<String>, arity: Arity, call: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.add(name, Func::new(arity, call))
    }

    /// Fold another map in; overloads append in their existing order
    pub fn merge(&mut self, other: FuncMap) {
        for (name, overloads) in other.funcs {
            self.funcs.entry(name).or_default().extend(overloads);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Vec<Func>> {
        self.funcs.get(name)
    }

    /// Snapshot of the registered names, for parse-time lookup
    pub fn name_set(&self) -> HashSet<String> {
        self.funcs.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn upper() -> Func {
        Func::new(Arity::Exact(1), |args| {
            match &args[0] {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Err(format!("can't upper {}", other.type_name())),
            }
        })
    }

    #[test]
    fn invoke_checks_arity() {
        let func = upper();

        assert_eq!(Ok(Value::from("HI")), func.invoke(&[Value::from("hi")]));
        assert_eq!(
            Err("wrong number of args: want 1 args, got 2".to_string()),
            func.invoke(&[Value::from("hi"), Value::from("x")])
        );
    }

    #[test]
    fn varargs_accepts_more() {
        let func = Func::new(Arity::AtLeast(1), |args| Ok(Value::Int(args.len() as i64)));

        assert_eq!(Ok(Value::Int(3)), func.invoke(&[Value::Null, Value::Null, Value::Null]));
        assert!(func.invoke(&[]).is_err());
    }

    #[test]
    fn overloads_preserve_registration_order() {
        let mut funcs = FuncMap::new();
        funcs.add("f", Func::new(Arity::Exact(1), |_| Ok(Value::Int(1))));
        funcs.add("f", Func::new(Arity::Exact(2), |_| Ok(Value::Int(2))));

        let overloads = funcs.get("f").unwrap();

        assert_eq!(2, overloads.len());
        assert_eq!(Arity::Exact(1), overloads[0].arity());
        assert_eq!(Arity::Exact(2), overloads[1].arity());
    }

    #[test]
    fn merge_and_names() {
        let mut a = FuncMap::new();
        a.add_fn("one", Arity::Exact(0), |_| Ok(Value::Int(1)));
        let mut b = FuncMap::new();
        b.add_fn("two", Arity::Exact(0), |_| Ok(Value::Int(2)));
        a.merge(b);

        assert!(a.contains("one"));
        assert!(a.contains("two"));
        assert_eq!(2, a.name_set().len());
    }
}
