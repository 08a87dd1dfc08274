//! Diagnostics produced by every stage of the pipeline.
//!
//! Diagnostics are values, not errors: each stage pushes them into a
//! [`Diagnostics`] sink and keeps going. A unit has failed as soon as the
//! sink holds one error-severity entry, even if later stages still run.

use std::fmt;

use crate::span::{SourceMap, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }
}

/// Which stage of the pipeline a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Lexical,
    Syntax,
    NameResolution,
    Type,
    GenericBinding,
    ConstEval,
    /// Driver-level problems such as import cycles or a missing entry point.
    Driver,
}

/// A secondary location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Related {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Category,
    pub code: Option<&'static str>,
    pub message: String,
    pub span: Span,
    pub related: Vec<Related>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, category: Category, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity,
            category,
            code: None,
            message: message.into(),
            span,
            related: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn error(category: Category, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, category, message, span)
    }

    pub fn warning(category: Category, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, category, message, span)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_related(mut self, span: Span, message: impl Into<String>) -> Self {
        self.related.push(Related {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render with unit names and source snippets.
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut output = String::new();
        match self.code {
            Some(code) => output.push_str(&format!(
                "{}[{}]: {}\n",
                self.severity.label(),
                code,
                self.message
            )),
            None => output.push_str(&format!("{}: {}\n", self.severity.label(), self.message)),
        }
        render_location(&mut output, sources, self.span, None);
        for related in &self.related {
            render_location(&mut output, sources, related.span, Some(&related.message));
        }
        for note in &self.notes {
            output.push_str(&format!("  = note: {note}\n"));
        }
        output
    }
}

fn render_location(output: &mut String, sources: &SourceMap, span: Span, label: Option<&str>) {
    let Some(file) = sources.get(span.file) else {
        return;
    };
    let (line, column) = if span.line == 0 {
        file.line_col(span.start)
    } else {
        (span.line, span.column)
    };
    output.push_str(&format!("  --> {}:{}:{}\n", file.name, line, column));
    let text = file.line_text(line);
    output.push_str(&format!("{line:4} | {text}\n"));
    let width = file.slice(span).chars().take_while(|ch| *ch != '\n').count().max(1);
    let underline = format!(
        "     | {}{}",
        " ".repeat(column.saturating_sub(1) as usize),
        "^".repeat(width)
    );
    match label {
        Some(label) => output.push_str(&format!("{underline} {label}\n")),
        None => {
            output.push_str(&underline);
            output.push('\n');
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity.label())?;
        if let Some(code) = self.code {
            write!(f, "[{code}]")?;
        }
        write!(f, ": {} at {}:{}", self.message, self.span.line, self.span.column)
    }
}

/// Ordered collection of diagnostics for one unit or a whole compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, category: Category, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::error(category, message, span));
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|diagnostic| diagnostic.is_error()).count()
    }

    /// Stable sort by unit and source position; ties keep emission order.
    pub fn sort(&mut self) {
        self.items
            .sort_by_key(|diagnostic| (diagnostic.span.file, diagnostic.span.start, diagnostic.span.end));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn render(&self, sources: &SourceMap) -> String {
        self.items
            .iter()
            .map(|diagnostic| diagnostic.render(sources))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Diagnostics {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::FileId;

    #[test]
    fn sorting_is_stable_for_equal_spans() {
        let span = Span::new(FileId(0), 3, 4);
        let mut diagnostics = Diagnostics::new();
        diagnostics.error(Category::Type, Span::new(FileId(0), 9, 10), "late");
        diagnostics.error(Category::Type, span, "first");
        diagnostics.push(Diagnostic::warning(Category::Type, "second", span));
        diagnostics.sort();
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "late"]);
        assert_eq!(diagnostics.error_count(), 2);
    }

    #[test]
    fn renders_location_and_related_spans() {
        let mut sources = SourceMap::new();
        let file = sources.add("main.kite", "let x = y;\n");
        let diagnostic = Diagnostic::error(
            Category::NameResolution,
            "unresolved name `y`",
            Span::new(file, 8, 9).with_position(1, 9),
        )
        .with_code("E0201")
        .with_related(Span::new(file, 4, 5).with_position(1, 5), "while initializing this");
        let text = diagnostic.render(&sources);
        assert!(text.starts_with("error[E0201]: unresolved name `y`"));
        assert!(text.contains("--> main.kite:1:9"));
        assert!(text.contains("^ while initializing this"));
    }
}
