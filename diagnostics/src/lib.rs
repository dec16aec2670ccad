//! Editor-shaped diagnostics derived from template errors.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use errors::{ExecError, ParseError, TemplateError};
use serde::{Deserialize, Serialize};
use span::{index_to_position, Span, NO_SPAN};

/// Get a list of diagnostics from a list of errors
pub fn get_diagnostics(errs: &[TemplateError], source: &str) -> Vec<Diagnosis> {
    errs.iter()
        .map(|err| Diagnosis {
            range: get_range(source, &error_span(err)),
            severity: Some(DiagnosisSeverity::ERROR),
            message: err.to_string(),
        })
        .collect()
}

fn error_span(err: &TemplateError) -> Span {
    match err {
        TemplateError::Parse(parse) => parse.span.clone(),
        TemplateError::Exec(exec) => exec
            .location
            .as_ref()
            .map(|loc| loc.span.clone())
            .unwrap_or(NO_SPAN),
        TemplateError::Io { .. } => NO_SPAN,
    }
}

fn get_range(source: &str, span: &Span) -> DiagnosisRange {
    DiagnosisRange {
        start: get_position(source, span.start),
        end: get_position(source, span.end),
    }
}

fn get_position(source: &str, idx: usize) -> DiagnosisPosition {
    let (line, character) = index_to_position(source, idx);

    DiagnosisPosition {
        line: line as u32,
        character: character as u32,
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub range: DiagnosisRange,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosisSeverity>,

    pub message: String,
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DiagnosisSeverity(i32);

impl DiagnosisSeverity {
    pub const ERROR: DiagnosisSeverity = DiagnosisSeverity(1);
    pub const WARNING: DiagnosisSeverity = DiagnosisSeverity(2);
    pub const INFORMATION: DiagnosisSeverity = DiagnosisSeverity(3);
    pub const HINT: DiagnosisSeverity = DiagnosisSeverity(4);
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Default, Deserialize, Serialize)]
pub struct DiagnosisPosition {
    pub line: u32,
    pub character: u32,
}

impl DiagnosisPosition {
    pub fn new(line: u32, character: u32) -> DiagnosisPosition {
        DiagnosisPosition { line, character }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Default, Deserialize, Serialize)]
pub struct DiagnosisRange {
    /// The range's start position (inclusive)
    pub start: DiagnosisPosition,
    /// The range's end position (exclusive)
    pub end: DiagnosisPosition,
}

impl DiagnosisRange {
    pub fn new(start: DiagnosisPosition, end: DiagnosisPosition) -> DiagnosisRange {
        DiagnosisRange { start, end }
    }
}

pub trait AsDiagnostic {
    fn as_diagnostic(&self, span: &Span) -> Diagnostic<()>;
}

macro_rules! impl_as_diagnostic {
    ($($error:tt),+) => {$(
        impl AsDiagnostic for $error {
            fn as_diagnostic(&self, span: &Span) -> Diagnostic<()> {
                Diagnostic::error()
                    .with_code(stringify!($error))
                    .with_message(self.to_string())
                    .with_labels(vec![Label::primary((), span.clone())])
            }
        }
    )+};
}

impl_as_diagnostic!(ParseError, ExecError);

impl AsDiagnostic for TemplateError {
    fn as_diagnostic(&self, span: &Span) -> Diagnostic<()> {
        match self {
            TemplateError::Parse(e) => e.as_diagnostic(span),
            TemplateError::Exec(e) => e.as_diagnostic(span),
            TemplateError::Io { .. } => Diagnostic::error()
                .with_code("IoError")
                .with_message(self.to_string())
                .with_labels(vec![Label::primary((), span.clone())]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use parser::Tree;
    use pretty_assertions::assert_eq;

    use crate::{get_diagnostics, Diagnosis, DiagnosisPosition, DiagnosisRange, DiagnosisSeverity};

    #[test]
    fn parse_error_becomes_a_diagnosis() {
        let source = "line one\n{{}}";
        let funcs: HashSet<String> = HashSet::new();

        let err = Tree::parse("t", source, None, None, &[&funcs]).unwrap_err();

        assert_eq!(
            vec![Diagnosis {
                range: DiagnosisRange {
                    start: DiagnosisPosition {
                        line: 1,
                        character: 2,
                    },
                    end: DiagnosisPosition {
                        line: 1,
                        character: 4,
                    },
                },
                severity: Some(DiagnosisSeverity::ERROR),
                message: String::from("t:2:3: missing value for command"),
            }],
            get_diagnostics(&[err.into()], source)
        );
    }
}
