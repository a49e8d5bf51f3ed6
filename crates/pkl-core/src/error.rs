//! The evaluator's single fallible result channel.
//!
//! Every subsystem reports failures as a [`PklError`] tagged with one of a closed set of
//! [`ErrorKind`]s. Errors accumulate a [`SourceSection`] at the point they are raised and a
//! [`StackFrame`] at each call boundary they cross on the way up, so that by the time an error
//! reaches the host it carries everything needed to render a Pkl-style diagnostic.

use std::fmt::{self, Display, Write as _};
use std::path::PathBuf;

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias used throughout the evaluator.
pub type EvalResult<T> = Result<T, PklError>;

/// The closed set of error kinds the evaluator can produce.
///
/// This mirrors the "Error kinds (closed set)" list: `Parse`, `NameResolution`, `Type`,
/// `Modifier`, `Arithmetic`, `Io`, `Security`, `Package`, `Timeout`, `Stack`, `Bug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Failure reported by the external parser front-end.
    Parse,
    /// Unresolved identifier, ambiguous binding, or a const-discipline violation.
    NameResolution,
    /// A forced value failed its declared or inferred type.
    Type,
    /// A declaration used a modifier combination that is not valid for its form.
    Modifier,
    /// Integer overflow, division by zero, or another numeric fault.
    Arithmetic,
    /// A source reader, resource reader, or filesystem operation failed.
    Io,
    /// An absolute URI or local path was rejected by the allow-list or root-dir guard.
    Security,
    /// Package metadata/zip fetch, checksum mismatch, or cache corruption.
    Package,
    /// The configured per-evaluation timeout expired.
    Timeout,
    /// Recursion or call-stack depth exceeded.
    Stack,
    /// An internal invariant was violated. Should never occur in a correct evaluator.
    Bug,
}

/// A byte/line-addressed span of source text, used to point at the offending construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeRange {
    pub start: u32,
    pub end: u32,
}

impl CodeRange {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// The file, line, offending text, and caret span rendered for a user-visible error.
///
/// Constructed lazily from a [`CodeRange`] plus the originating module's text, since most
/// errors are discarded (caught, or never printed) and we don't want to format source on
/// every raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSection {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub line_text: String,
    pub span_len: u32,
}

impl SourceSection {
    #[must_use]
    pub fn from_text(path: PathBuf, text: &str, range: CodeRange) -> Self {
        let start = range.start as usize;
        let mut line_start = text[..start.min(text.len())].rfind('\n').map_or(0, |i| i + 1);
        if line_start > start {
            line_start = start;
        }
        let line_end = text[start.min(text.len())..]
            .find('\n')
            .map_or(text.len(), |i| start + i);
        let line = text[..start.min(text.len())].matches('\n').count() as u32 + 1;
        let column = (start - line_start) as u32 + 1;
        let span_len = range.end.saturating_sub(range.start).max(1);
        Self {
            path,
            line,
            column,
            line_text: text[line_start..line_end].to_string(),
            span_len,
        }
    }
}

impl Display for SourceSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:{}:{}", self.path.display(), self.line, self.column)?;
        writeln!(f, "{}", self.line_text)?;
        let indent = " ".repeat(self.column.saturating_sub(1) as usize);
        let carets = "^".repeat(self.span_len as usize);
        write!(f, "{indent}{carets}")
    }
}

/// One frame of the rendered Pkl call stack.
///
/// Pushed by each call boundary a [`PklError`] bubbles through on its way to the top. Internal
/// implementation-language stack paths never appear here; only qualified Pkl names and source
/// sections do.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub qualified_name: String,
    pub section: Option<SourceSection>,
}

impl Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}", self.qualified_name)?;
        if let Some(section) = &self.section {
            write!(f, " ({}:{})", section.path.display(), section.line)?;
        }
        Ok(())
    }
}

/// A single evaluator error: kind, message, originating section, and accumulated call stack.
#[derive(Debug, Clone)]
pub struct PklError {
    kind: ErrorKind,
    message: String,
    section: Option<SourceSection>,
    stack: Vec<StackFrame>,
}

impl PklError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            section: None,
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_section(mut self, section: SourceSection) -> Self {
        self.section = Some(section);
        self
    }

    /// Appends a stack frame. Called once per call boundary as the error bubbles up.
    #[must_use]
    pub fn push_frame(mut self, frame: StackFrame) -> Self {
        self.stack.push(frame);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn section(&self) -> Option<&SourceSection> {
        self.section.as_ref()
    }

    #[must_use]
    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    /// A Bug-kind error for invariants that must never be violated by a correct evaluator.
    #[must_use]
    pub fn bug(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Bug, message)
    }
}

impl Display for PklError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {}: {} ---", self.kind, self.message)?;
        if let Some(section) = &self.section {
            writeln!(f, "{section}")?;
        }
        for frame in &self.stack {
            writeln!(f, "{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PklError {}

/// Helper for building the "X expected Y, got Z"-shaped messages scattered across the evaluator.
pub(crate) fn join_with_commas(items: impl IntoIterator<Item = impl Display>) -> String {
    let mut out = String::new();
    for (idx, item) in items.into_iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{item}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_section_points_at_the_right_line() {
        let text = "first\nsecond line\nthird";
        let section = SourceSection::from_text(PathBuf::from("a.pkl"), text, CodeRange::new(6, 12));
        assert_eq!(section.line, 2);
        assert_eq!(section.column, 1);
        assert_eq!(section.line_text, "second line");
    }

    #[test]
    fn display_renders_kind_message_and_stack() {
        let err = PklError::new(ErrorKind::Type, "expected Int").push_frame(StackFrame {
            qualified_name: "Foo#bar".into(),
            section: None,
        });
        let rendered = err.to_string();
        assert!(rendered.contains("Type"));
        assert!(rendered.contains("expected Int"));
        assert!(rendered.contains("Foo#bar"));
    }
}
