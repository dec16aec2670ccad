//! Convenience re-export of the engine's public surface.

pub use crate::builtins::BUILTINS;
pub use crate::{
    to_value, Arity, ExecError, ExecErrorKind, Func, FuncMap, ParseError, ParseErrorKind, Reflect,
    Template, TemplateError, Value,
};
