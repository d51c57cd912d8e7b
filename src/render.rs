//! Line-oriented pretty printer behind every `show` method.
//!
//! Renderings are built as a [`Block`] of lines, combined with prefixes,
//! suffixes and indentation, then flattened with `\n`.

/// Output style for `show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    /// Everything on one line.
    #[default]
    Compact,
    /// One entry per line with aligned columns.
    Verbose {
        /// Indentation applied to continuation lines.
        indent: usize,
        /// Indentation applied to the first line.
        first_indent: usize,
    },
}

impl Style {
    /// Verbose style with no indentation.
    pub fn verbose() -> Self {
        Style::Verbose {
            indent: 0,
            first_indent: 0,
        }
    }

    /// True for [`Style::Compact`].
    pub fn is_compact(&self) -> bool {
        matches!(self, Style::Compact)
    }
}

/// A multi-line text fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Block {
    lines: Vec<String>,
}

impl Block {
    pub(crate) fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
        }
    }

    pub(crate) fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub(crate) fn prefix_first(mut self, prefix: &str) -> Self {
        if let Some(first) = self.lines.first_mut() {
            first.insert_str(0, prefix);
        }
        self
    }

    pub(crate) fn suffix_last(mut self, suffix: &str) -> Self {
        if let Some(last) = self.lines.last_mut() {
            last.push_str(suffix);
        }
        self
    }

    /// Indents every line but the first by `width` spaces.
    pub(crate) fn indent_rest(mut self, width: usize) -> Self {
        let pad = " ".repeat(width);
        for line in self.lines.iter_mut().skip(1) {
            line.insert_str(0, &pad);
        }
        self
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub(crate) fn append(&mut self, other: Block) {
        self.lines.extend(other.lines);
    }

    pub(crate) fn render(&self) -> String {
        self.lines.join("\n")
    }
}
