//! Source diagnostics for the schema and model compilers.
//!
//! Every compile error carries the byte offset, line, and column of the
//! offending token and renders a few lines of context with a caret under
//! the error position:
//!
//! ```text
//! error at line 7, column 18: unknown parameter type 'Vfoo'
//!    5 |     enum Vfo { A, B, }
//!    6 |
//!  → 7 |     fn set_freq(Vfoo target);
//!      |                 ^
//! ```

use std::fmt;

/// A position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
    /// 0-based byte offset.
    pub offset: usize,
}

impl SourcePos {
    /// Compute the line/column of `offset` within `source`.
    pub fn at(source: &str, offset: usize) -> Self {
        let mut line = 1;
        let mut column = 1;
        for (i, c) in source.char_indices() {
            if i >= offset {
                break;
            }
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        SourcePos {
            line,
            column,
            offset,
        }
    }
}

/// One compile error with its rendered source context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Where the error was detected.
    pub pos: SourcePos,
    /// What went wrong.
    pub message: String,
    /// A few source lines around the error with a caret marker.
    context: String,
}

impl Diagnostic {
    /// Build a diagnostic at `offset` into `source`.
    pub fn new(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let pos = SourcePos::at(source, offset);
        let context = render_context(source, pos);
        Diagnostic {
            pos,
            message: message.into(),
            context,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "error at line {}, column {}: {}",
            self.pos.line, self.pos.column, self.message
        )?;
        write!(f, "{}", self.context)
    }
}

impl std::error::Error for Diagnostic {}

/// A batch of diagnostics from one compilation.
///
/// Structural errors abort at the first failure; semantic checks keep going
/// and report everything they find.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    /// Whether any error was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Record one error.
    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    /// `Ok(value)` when clean, `Err(self)` otherwise.
    pub fn into_result<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diag}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

impl From<Diagnostics> for holyrig_core::Error {
    fn from(diags: Diagnostics) -> Self {
        holyrig_core::Error::Config(diags.to_string())
    }
}

/// Render the source lines around `pos` with a caret marker.
fn render_context(source: &str, pos: SourcePos) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let line_idx = pos.line.saturating_sub(1);
    let start = line_idx.saturating_sub(2);
    let end = (line_idx + 1).min(lines.len());

    let width = (end.max(1).ilog10() + 1) as usize;
    let mut out = String::new();
    for (i, line) in lines[start..end].iter().enumerate() {
        let number = start + i + 1;
        if number == pos.line {
            out.push_str(&format!(" → {number:width$} | {line}\n"));
            out.push_str(&format!(
                "   {} | {}^\n",
                " ".repeat(width),
                " ".repeat(pos.column.saturating_sub(1))
            ));
        } else {
            out.push_str(&format!("   {number:width$} | {line}\n"));
        }
    }
    out
}
