use std::fmt;

use serde::{Deserialize, Serialize};
use span::Span;
use thiserror::Error;

/// Common error for parsing and executing templates
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum TemplateError {
    #[error("{0}")]
    Parse(ParseError),
    #[error("{0}")]
    Exec(ExecError),
    #[error("reading {path}: {message}")]
    Io { path: String, message: String },
}

/// A parse error with the position it was reported at.
///
/// Renders as `parse_name:line:column: message`. Line and column are
/// one based; the column is recomputed from the offending byte offset.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{parse_name}:{line}:{column}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub parse_name: String,
    pub line: usize,
    pub column: usize,
    pub span: Span,
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    /// Message carried by an in-band error token from the lexer
    #[error("{0}")]
    Lex(String),
    #[error("unexpected {token} in {context}")]
    Unexpected { token: String, context: String },
    #[error("unexpected EOF")]
    UnexpectedEof,
    #[error("unexpected {0}")]
    UnexpectedNode(String),
    #[error("function '{0}' not defined")]
    UndefinedFunction(String),
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
    #[error("bad variable name {0}")]
    BadVariable(String),
    #[error("multiple definition of template {0}")]
    MultipleDefinition(String),
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("empty command")]
    EmptyCommand,
    #[error("non executable command in pipeline stage {0}")]
    NonExecutableCommand(usize),
    #[error("unexpected . after term {0}")]
    DotAfterTerm(String),
    #[error("unclosed right paren: unexpected {0}")]
    UnclosedParen(String),
    #[error("expected end; found {0}")]
    ExpectedEnd(String),
    #[error("unexpected {0} outside of for")]
    LoopControlOutsideFor(String),
    #[error("integer overflow: {0}")]
    IntegerOverflow(String),
    #[error("illegal number syntax: {0}")]
    IllegalNumber(String),
    #[error("malformed character constant: {0}")]
    MalformedChar(String),
    #[error("malformed string constant: {0}")]
    MalformedString(String),
    #[error("no template text to parse")]
    NoInput,
    #[error("internal error: {0}")]
    Internal(String),
}

/// An execution error, annotated with the failing template and, when a
/// node was being evaluated, the node's source position and a clipped
/// rendering of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub template_name: String,
    pub location: Option<ErrorLocation>,
}

/// Where in the source an execution error was raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub parse_name: String,
    pub line: usize,
    pub column: usize,
    /// Rendering of the node under evaluation, clipped to 20 characters
    pub context: String,
    pub span: Span,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "template: {}:{}:{}: executing {} at <{}>: {}",
                loc.parse_name, loc.line, loc.column, self.template_name, loc.context, self.kind
            ),
            None => write!(f, "template: {}: {}", self.template_name, self.kind),
        }
    }
}

impl std::error::Error for ExecError {}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ExecErrorKind {
    #[error("{0} is an incomplete or empty template")]
    IncompleteTemplate(String),
    #[error("template {0} not defined")]
    TemplateNotDefined(String),
    #[error("no template {name} associated with template {parent}")]
    NoAssociatedTemplate { name: String, parent: String },
    #[error("exceeded maximum template depth ({0})")]
    DepthExceeded(usize),
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("null pointer evaluating null.{0}")]
    NullPointer(String),
    #[error("{name} is not a field/method of {type_name}")]
    NotAField { name: String, type_name: String },
    #[error("{0} has arguments but cannot be invoked as method")]
    FieldWithArgs(String),
    #[error("can't give argument to non-function {0}")]
    NotAFunction(String),
    #[error("{0} is not a defined function")]
    FunctionNotDefined(String),
    #[error("null is not a command")]
    NullCommand,
    #[error("can't evaluate command {0}")]
    BadCommand(String),
    #[error("can't handle {0} for arg")]
    BadArg(String),
    #[error("error calling {name}:{details}")]
    CallFailed { name: String, details: String },
    #[error("for can't iterate over {0}")]
    NotIterable(String),
    #[error("invalid {0} outside of for")]
    LoopControlOutsideFor(String),
    #[error("writing to output: {0}")]
    Write(String),
    #[error("internal error: {0}")]
    Internal(String),
}

macro_rules! impl_from_error {
    ($($variant:ident($error:ty)),+) => {$(
        impl From<$error> for TemplateError {
            fn from(e: $error) -> Self {
                TemplateError::$variant(e)
            }
        }
    )+};
}

impl_from_error!(Parse(ParseError), Exec(ExecError));

#[cfg(test)]
mod tests {
    use super::*;
    use span::NO_SPAN;

    #[test]
    fn parse_error_display() {
        let err = ParseError {
            kind: ParseErrorKind::UndefinedFunction("shout".to_string()),
            parse_name: "page".to_string(),
            line: 3,
            column: 7,
            span: 41..46,
        };

        assert_eq!("page:3:7: function 'shout' not defined", err.to_string());
    }

    #[test]
    fn exec_error_display_with_location() {
        let err = ExecError {
            kind: ExecErrorKind::TemplateNotDefined("footer".to_string()),
            template_name: "page".to_string(),
            location: Some(ErrorLocation {
                parse_name: "page".to_string(),
                line: 1,
                column: 3,
                context: "{{template \"footer\"}}".to_string(),
                span: 2..23,
            }),
        };

        assert_eq!(
            "template: page:1:3: executing page at <{{template \"footer\"}}>: template footer not defined",
            err.to_string()
        );
    }

    #[test]
    fn exec_error_display_without_location() {
        let err = ExecError {
            kind: ExecErrorKind::IncompleteTemplate("page".to_string()),
            template_name: "page".to_string(),
            location: None,
        };

        assert_eq!(
            "template: page: page is an incomplete or empty template",
            err.to_string()
        );
    }

    #[test]
    fn umbrella_conversions() {
        let parse = ParseError {
            kind: ParseErrorKind::UnexpectedEof,
            parse_name: "t".to_string(),
            line: 1,
            column: 1,
            span: NO_SPAN,
        };

        assert_eq!(
            TemplateError::Parse(parse.clone()),
            TemplateError::from(parse)
        );
    }
}
