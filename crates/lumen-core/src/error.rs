//! Structured diagnostics and thread-local error state.
//!
//! A failure is a `Phase` × `ErrorKind` pair plus message and location.
//! A single per-thread last-error slot is sufficient because evaluation
//! is single-threaded and each `Env` is thread-affinitive.

use std::cell::RefCell;
use std::fmt;

/// When, in the source-to-value pipeline, a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Analysis,
    Macroexpand,
    Eval,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Parse => "parse",
            Phase::Analysis => "analysis",
            Phase::Macroexpand => "macroexpand",
            Phase::Eval => "eval",
        };
        write!(f, "{s}")
    }
}

/// What kind of defect was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NumberError,
    StringError,
    NameError,
    ArityError,
    ValueError,
    TypeError,
    ArithmeticError,
    IndexError,
    IoError,
    InternalError,
    OutOfMemory,
}

impl ErrorKind {
    /// Only these kinds may be caught by `try`. `out_of_memory`,
    /// `internal_error`, and host stack overflow are not catchable;
    /// stack overflow has no `ErrorKind` of its own because it is
    /// detected structurally by the evaluators, not raised as a value.
    pub fn is_user_catchable(&self) -> bool {
        !matches!(self, ErrorKind::OutOfMemory | ErrorKind::InternalError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::NumberError => "number_error",
            ErrorKind::StringError => "string_error",
            ErrorKind::NameError => "name_error",
            ErrorKind::ArityError => "arity_error",
            ErrorKind::ValueError => "value_error",
            ErrorKind::TypeError => "type_error",
            ErrorKind::ArithmeticError => "arithmetic_error",
            ErrorKind::IndexError => "index_error",
            ErrorKind::IoError => "io_error",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::OutOfMemory => "out_of_memory",
        };
        write!(f, "{s}")
    }
}

/// A source location as carried by `SourceInfo`, loosened to
/// `Option`s for diagnostics raised before a file/line is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Location {
            file: Some(file.into()),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("<unknown>");
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "{file}:{l}:{c}"),
            _ => write!(f, "{file}"),
        }
    }
}

/// The structured error report: what failed, when in the pipeline, and
/// where in the source.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
    pub location: Location,
    /// The value passed to a Lumen-level `(throw v)`, when this diagnostic
    /// originated there rather than from a host-detected failure. `catch`
    /// binds this (falling back to the diagnostic itself rendered as a
    /// string for host-raised errors) so both channels share one unwind
    /// path through the evaluators.
    pub thrown_value: Option<crate::value::Value>,
}

impl Diagnostic {
    pub fn new(phase: Phase, kind: ErrorKind, message: impl Into<String>, location: Location) -> Self {
        Diagnostic {
            phase,
            kind,
            message: message.into(),
            location,
            thrown_value: None,
        }
    }

    /// A Lumen-level `(throw v)`: carries `v` itself so `catch` can bind
    /// the original value instead of a re-derived message string.
    pub fn thrown(value: crate::value::Value, location: Location) -> Self {
        Diagnostic {
            phase: Phase::Eval,
            kind: ErrorKind::ValueError,
            message: "user-level exception".to_string(),
            location,
            thrown_value: Some(value),
        }
    }

    pub fn is_catchable(&self) -> bool {
        self.kind.is_user_catchable()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----- Error -------------------------------------------")?;
        writeln!(f, "Phase:    {}", self.phase)?;
        writeln!(f, "Kind:     {}", self.kind)?;
        writeln!(f, "Message:  {}", self.message)?;
        write!(f, "Location: {}", self.location)
    }
}

impl std::error::Error for Diagnostic {}

thread_local! {
    /// Per-thread last-error slot. Each `Env` lives on one thread
    ///, so this is sufficient without
    /// a context handle threaded everywhere; evaluators clear it on entry
    /// to a fresh top-level form.
    static LAST_ERROR: RefCell<Option<Diagnostic>> = const { RefCell::new(None) };
}

pub fn set_last_error(diag: Diagnostic) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(diag));
}

pub fn take_last_error() -> Option<Diagnostic> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_reference_text() {
        let d = Diagnostic::new(
            Phase::Analysis,
            ErrorKind::NameError,
            "Unable to resolve symbol: foo",
            Location::new("repl", 3, 1),
        );
        let rendered = d.to_string();
        assert!(rendered.contains("Phase:    analysis"));
        assert!(rendered.contains("Kind:     name_error"));
        assert!(rendered.contains("Location: repl:3:1"));
    }

    #[test]
    fn oom_and_internal_are_not_catchable() {
        assert!(!ErrorKind::OutOfMemory.is_user_catchable());
        assert!(!ErrorKind::InternalError.is_user_catchable());
        assert!(ErrorKind::ArityError.is_user_catchable());
    }

    #[test]
    fn thread_local_slot_round_trips() {
        clear_last_error();
        assert!(take_last_error().is_none());
        set_last_error(Diagnostic::new(
            Phase::Eval,
            ErrorKind::ArithmeticError,
            "divide by zero",
            Location::default(),
        ));
        let d = take_last_error().expect("diagnostic");
        assert_eq!(d.kind, ErrorKind::ArithmeticError);
        assert!(take_last_error().is_none());
    }
}
