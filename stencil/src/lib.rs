//! A data-driven textual template engine.
//!
//! A template interleaves literal text with `{{ }}`-delimited actions:
//! field accesses, pipelines, control structures, and invocations of
//! named sub-templates. Parsing builds a tree per named template;
//! execution walks the tree against a dynamically typed [`Value`],
//! writing output to any `std::io::Write` sink.
//!
//! ```
//! use stencil::{Template, Value};
//!
//! let tmpl = Template::new("greeting");
//! tmpl.parse("Hello {{ .email | default \"user@host.com\" }}").unwrap();
//!
//! let mut out = vec![];
//! tmpl.execute(&mut out, &Value::from(serde_json::json!({}))).unwrap();
//! assert_eq!("Hello user@host.com", String::from_utf8(out).unwrap());
//! ```

pub mod builtins;
mod exec;
mod funcs;
mod printf;
pub mod prelude;
mod template;
mod value;

pub use errors::{
    ErrorLocation, ExecError, ExecErrorKind, ParseError, ParseErrorKind, TemplateError,
};
pub use funcs::{Arity, Func, FuncMap};
pub use parser::Tree;
pub use template::Template;
pub use value::{to_value, Reflect, Value};
