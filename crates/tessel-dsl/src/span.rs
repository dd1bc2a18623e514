//! Source positions for host-built ASTs
//!
//! Programs arrive as ASTs built by a host, not as text, so a position is
//! whatever the host attaches: usually a line number in the host source.
//! Diagnostics carry these through every pass.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of an AST node in the host program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// 1-based host source line, 0 when unattributed
    pub line: u32,
}

impl Span {
    pub fn at(line: u32) -> Span {
        Span { line }
    }

    /// A span for nodes with no host attribution.
    pub fn none() -> Span {
        Span { line: 0 }
    }

    pub fn is_none(&self) -> bool {
        self.line == 0
    }

    /// Prefer the first attributed span.
    pub fn or(self, other: Span) -> Span {
        if self.is_none() { other } else { self }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "<unattributed>")
        } else {
            write!(f, "line {}", self.line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_or_prefers_attributed() {
        assert_eq!(Span::none().or(Span::at(4)), Span::at(4));
        assert_eq!(Span::at(2).or(Span::at(4)), Span::at(2));
    }
}
