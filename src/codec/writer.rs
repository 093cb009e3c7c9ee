use thiserror::Error;

use super::output::{Output, StringOutput};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("output closed after {written} bytes")]
    OutputClosed { written: usize },
}

/// Suspendable writer, the dual of [`Parser`](super::Parser).
///
/// `pull` writes until the output fills, then returns a continuation that
/// resumes exactly where it stopped.
pub trait Writer: Sized {
    fn pull<O: Output>(self, output: &mut O) -> Write<Self>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write<W> {
    Cont(W),
    Done,
    Error(WriteError),
}

impl<W: Writer> Write<W> {
    pub fn is_cont(&self) -> bool {
        matches!(self, Write::Cont(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Write::Done)
    }

    pub fn pull<O: Output>(self, output: &mut O) -> Write<W> {
        match self {
            Write::Cont(writer) => writer.pull(output),
            terminal => terminal,
        }
    }
}

/// Streams a fixed text, remembering how far it got.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextWriter {
    text: String,
    index: usize,
}

impl TextWriter {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), index: 0 }
    }

    pub fn written(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> &str {
        &self.text[self.index..]
    }
}

impl Writer for TextWriter {
    fn pull<O: Output>(mut self, output: &mut O) -> Write<Self> {
        if output.is_done() && self.index < self.text.len() {
            return Write::Error(WriteError::OutputClosed { written: self.index });
        }
        self.index += output.write_str(&self.text[self.index..]);
        if self.index >= self.text.len() {
            Write::Done
        } else if output.is_done() {
            Write::Error(WriteError::OutputClosed { written: self.index })
        } else {
            Write::Cont(self)
        }
    }
}

/// Drives a writer to completion into an unbounded string.
pub fn write_string<W: Writer>(writer: W) -> Result<String, WriteError> {
    let mut output = StringOutput::new();
    match writer.pull(&mut output) {
        Write::Done => Ok(output.into_string()),
        Write::Error(e) => Err(e),
        Write::Cont(_) => Err(WriteError::OutputClosed { written: output.as_str().len() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resumes_without_reemitting() {
        let mut output = StringOutput::bounded(4);
        let mut collected = String::new();
        let mut state = Write::Cont(TextWriter::new("@event(node:a)"));
        while state.is_cont() {
            state = state.pull(&mut output);
            collected.push_str(&output.take());
        }
        assert!(state.is_done());
        assert_eq!(collected, "@event(node:a)");
    }

    #[test]
    fn test_closed_output_errors() {
        let mut output = StringOutput::bounded(2);
        let state = TextWriter::new("abcd").pull(&mut output);
        output.close();
        assert_eq!(state.pull(&mut output), Write::Error(WriteError::OutputClosed { written: 2 }));
    }
}
