//! Compile-time diagnostics
//!
//! Structured errors carrying the offending node's source position.
//! A compile error aborts the compile of the enclosing kernel or helper;
//! recorder errors are fatal to the whole control program.

use std::fmt;

use crate::span::Span;

/// Category of compilation error, by the pass that detects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Specialization
    /// Free identifier not bound in the host environment
    UnboundName,
    /// Call of something that is not a function, builtin, or macro
    NotCallable,
    /// Macro expansion produced a non-expression in expression position
    MacroExpansion,

    // Semantic checking
    /// Type violation; the message is always "invalid types"
    Type,
    /// Wrong parameter or argument count
    Arity,

    // Phase analysis
    /// Race-freedom violation
    Phase,
    /// Off-center access outside the affine form, or a non-centered write
    Stencil,

    // Recording
    /// Control-program structure violation (unbalanced END, undeclared
    /// global, malformed rectangle)
    MalformedProgram,

    // Lowering
    /// Feature not available on the requested backend
    UnsupportedBackend,

    /// Bug in the compiler
    Internal,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::UnboundName => "unbound name",
            ErrorKind::NotCallable => "not callable",
            ErrorKind::MacroExpansion => "macro expansion error",
            ErrorKind::Type => "type error",
            ErrorKind::Arity => "arity error",
            ErrorKind::Phase => "phase error",
            ErrorKind::Stencil => "stencil error",
            ErrorKind::MalformedProgram => "malformed program",
            ErrorKind::UnsupportedBackend => "unsupported backend",
            ErrorKind::Internal => "internal compiler error",
        }
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
    /// Additional context or suggestions
    pub notes: Vec<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// The fixed type-violation diagnostic. Tests rely on this text.
    pub fn invalid_types(span: Span) -> Self {
        Self::new(ErrorKind::Type, span, "invalid types")
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}: {}", self.kind.name(), self.message)?;
        if !self.span.is_none() {
            write!(f, " ({})", self.span)?;
        }
        for note in &self.notes {
            write!(f, "\n  = note: {}", note)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Result type for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_types_message_is_fixed() {
        let err = CompileError::invalid_types(Span::none());
        assert_eq!(err.message, "invalid types");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_display_with_span_and_note() {
        let err = CompileError::new(ErrorKind::Phase, Span::at(7), "field written and reduced")
            .with_note("drop one of the accesses");
        let text = err.to_string();
        assert!(text.contains("phase error"));
        assert!(text.contains("line 7"));
        assert!(text.contains("drop one of the accesses"));
    }
}
