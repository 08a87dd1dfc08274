//! Source locations shared by tokens, AST nodes and diagnostics.
//!
//! A [`Span`] is a half-open byte range `[start, end)` into one unit plus the
//! 1-based line and column of `start`. Spans are only used for reporting;
//! no stage makes semantic decisions based on them.

use std::fmt;

/// Identifies a source unit inside a [`SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Span {
    pub file: FileId,
    /// Byte offset of the first byte.
    pub start: u32,
    /// Byte offset one past the last byte.
    pub end: u32,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Span {
            file,
            start,
            end,
            line: 0,
            column: 0,
        }
    }

    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Zero-width span at the end of `self`.
    pub fn end_point(self) -> Self {
        Span {
            start: self.end,
            ..self
        }
    }

    /// Covers both spans. Line and column stay those of the earlier span.
    pub fn to(self, other: Span) -> Span {
        if other.file != self.file {
            return self;
        }
        let (first, _) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: first.line,
            column: first.column,
        }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end.max(self.start + 1)
    }
}

/// A named unit of source text.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: FileId,
    pub name: String,
    pub text: String,
    line_starts: Vec<u32>,
}

impl SourceFile {
    fn new(id: FileId, name: String, text: String) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, byte)| *byte == b'\n')
                .map(|(index, _)| index as u32 + 1),
        );
        SourceFile {
            id,
            name,
            text,
            line_starts,
        }
    }

    /// 1-based line and column (in characters) of a byte offset.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        let line_start = self.line_starts[line_index] as usize;
        let end = (offset as usize).min(self.text.len());
        let column = self
            .text
            .get(line_start..end)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(end - line_start);
        (line_index as u32 + 1, column as u32 + 1)
    }

    /// The full text of a 1-based line without its terminator.
    pub fn line_text(&self, line: u32) -> &str {
        let index = line.saturating_sub(1) as usize;
        let Some(&start) = self.line_starts.get(index) else {
            return "";
        };
        let end = self
            .line_starts
            .get(index + 1)
            .map(|next| *next as usize - 1)
            .unwrap_or(self.text.len());
        self.text[start as usize..end].trim_end_matches('\r')
    }

    pub fn slice(&self, span: Span) -> &str {
        &self.text[span.start as usize..span.end as usize]
    }
}

/// All units known to a compilation session.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile::new(id, name.into(), text.into()));
        id
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    pub fn name(&self, id: FileId) -> &str {
        self.get(id).map(|file| file.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn find(&self, name: &str) -> Option<FileId> {
        self.files.iter().find(|file| file.name == name).map(|file| file.id)
    }

    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_line_and_column() {
        let mut map = SourceMap::new();
        let id = map.add("main", "let a = 1;\nlet béta = 2;\n");
        let file = map.get(id).expect("file");
        assert_eq!(file.line_col(0), (1, 1));
        assert_eq!(file.line_col(11), (2, 1));
        // `=` after a two-byte character
        assert_eq!(file.line_col(21), (2, 10));
        assert_eq!(file.line_text(2), "let béta = 2;");
    }

    #[test]
    fn merges_spans_keeping_the_earlier_position() {
        let a = Span::new(FileId(0), 4, 6).with_position(1, 5);
        let b = Span::new(FileId(0), 10, 12).with_position(2, 1);
        let merged = b.to(a);
        assert_eq!((merged.start, merged.end), (4, 12));
        assert_eq!((merged.line, merged.column), (1, 5));
    }
}
