//! Error types for the pattern DSL.
//!
//! Parse errors identify a position inside the mini-notation source,
//! composed with the caller-supplied base location so editors can point at
//! the right spot in a larger document. Build errors cover DSL misuse
//! discovered while constructing a pattern tree. Runtime resource problems
//! (missing samples, lag) are not errors; the engine degrades those to
//! silence for the affected voice.

use crate::pattern::SourcePos;
use thiserror::Error;

/// Syntax error in mini-notation source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(pos: SourcePos, message: impl Into<String>) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }

    /// Re-anchor the error relative to a base source location (both
    /// positions 1-based). Positions on the first line add column offsets;
    /// later lines only shift the line.
    pub fn offset_by(mut self, base: SourcePos) -> Self {
        if self.line == 1 {
            self.column += base.column.saturating_sub(1);
        }
        self.line += base.line.saturating_sub(1);
        self
    }
}

/// Error raised while building a pattern from DSL calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("time factor must be positive and finite, got {0}")]
    BadTimeFactor(f64),
    #[error("unknown note name: {0:?}")]
    UnknownNote(String),
    #[error("unknown scale: {0:?}")]
    UnknownScale(String),
    #[error("unknown waveform: {0:?}")]
    UnknownWaveform(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_offsets_compose() {
        let err = ParseError::new(SourcePos::new(1, 5), "unexpected ']'");
        let shifted = err.offset_by(SourcePos::new(10, 3));
        assert_eq!(shifted.line, 10);
        assert_eq!(shifted.column, 7);

        let err = ParseError::new(SourcePos::new(2, 5), "unexpected ']'");
        let shifted = err.offset_by(SourcePos::new(10, 3));
        assert_eq!(shifted.line, 11);
        assert_eq!(shifted.column, 5);
    }

    #[test]
    fn test_build_error_display() {
        let e = BuildError::BadTimeFactor(0.0);
        assert!(e.to_string().contains("positive"));
    }
}
