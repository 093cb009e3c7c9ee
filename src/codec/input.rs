use std::fmt;

/// Position snapshot into a stream of input chunks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mark {
    /// Byte offset from the start of the stream
    pub offset: usize,
    /// 1-indexed line number
    pub line: usize,
    /// 1-indexed column number, in chars
    pub column: usize,
}

impl Mark {
    pub const START: Mark = Mark { offset: 0, line: 1, column: 1 };

    pub const fn new(offset: usize, line: usize, column: usize) -> Self {
        Self { offset, line, column }
    }

    fn advance(&mut self, c: char) {
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

impl Default for Mark {
    fn default() -> Self {
        Mark::START
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Non-blocking cursor over a chunk of characters.
///
/// Exactly one of `is_cont`, `is_empty` and `is_done` holds at any time.
/// A partial input (`is_part`) reports `is_empty` when it runs dry, telling
/// parsers to suspend rather than treat the end of the chunk as the end of
/// the stream.
pub trait Input {
    /// A head character is available.
    fn is_cont(&self) -> bool {
        self.head().is_some()
    }

    /// No character available now, but more may arrive.
    fn is_empty(&self) -> bool {
        self.head().is_none() && self.is_part()
    }

    /// No character available and none will arrive.
    fn is_done(&self) -> bool {
        self.head().is_none() && !self.is_part()
    }

    fn is_part(&self) -> bool;

    fn head(&self) -> Option<char>;

    /// Advances past the head character.
    fn step(&mut self);

    fn mark(&self) -> Mark;
}

/// Input over a borrowed string chunk.
#[derive(Clone, Debug)]
pub struct StrInput<'a> {
    chunk: &'a str,
    index: usize,
    mark: Mark,
    part: bool,
}

impl<'a> StrInput<'a> {
    /// A complete input: running out of characters ends the stream.
    pub fn new(chunk: &'a str) -> Self {
        Self { chunk, index: 0, mark: Mark::START, part: false }
    }

    /// Marks whether more chunks will follow this one.
    pub fn part(mut self, part: bool) -> Self {
        self.part = part;
        self
    }

    /// Continues position tracking from a previous chunk.
    pub fn with_mark(mut self, mark: Mark) -> Self {
        self.mark = mark;
        self
    }

    pub fn remaining(&self) -> &'a str {
        &self.chunk[self.index..]
    }
}

impl Input for StrInput<'_> {
    fn is_part(&self) -> bool {
        self.part
    }

    fn head(&self) -> Option<char> {
        self.chunk[self.index..].chars().next()
    }

    fn step(&mut self) {
        if let Some(c) = self.head() {
            self.index += c.len_utf8();
            self.mark.advance(c);
        }
    }

    fn mark(&self) -> Mark {
        self.mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_of_partial_input() {
        let mut input = StrInput::new("a").part(true);
        assert!(input.is_cont());
        input.step();
        assert!(input.is_empty());
        assert!(!input.is_done());

        let mut input = StrInput::new("a");
        input.step();
        assert!(input.is_done());
    }

    #[test]
    fn test_mark_tracks_lines_across_chunks() {
        let mut input = StrInput::new("ab\nc").part(true);
        while input.is_cont() {
            input.step();
        }
        assert_eq!(input.mark(), Mark::new(4, 2, 2));
        let mut next = StrInput::new("é").with_mark(input.mark());
        next.step();
        assert_eq!(next.mark(), Mark::new(6, 2, 3));
    }
}
