use std::fmt;

use super::diagnostic::Diagnostic;
use super::input::{Input, Mark, StrInput};

/// Suspendable parser.
///
/// `feed` consumes the parser and returns its next state, so each
/// intermediate continuation is an independent value: clone one to try a
/// speculative parse without disturbing the original.
pub trait Parser: Sized {
    type Output;

    fn feed<I: Input>(self, input: &mut I) -> Parse<Self>;
}

/// State of a parser after a feed.
pub enum Parse<P: Parser> {
    /// Needs more input to make progress.
    Cont(P),
    Done(P::Output),
    Error(Diagnostic),
}

impl<P: Parser> Parse<P> {
    pub fn is_cont(&self) -> bool {
        matches!(self, Parse::Cont(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Parse::Done(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Parse::Error(_))
    }

    /// Feeds a continuation; terminal states pass through unchanged.
    pub fn feed<I: Input>(self, input: &mut I) -> Parse<P> {
        match self {
            Parse::Cont(parser) => parser.feed(input),
            terminal => terminal,
        }
    }

    pub fn map_cont<Q, F>(self, f: F) -> Parse<Q>
    where
        Q: Parser<Output = P::Output>,
        F: FnOnce(P) -> Q,
    {
        match self {
            Parse::Cont(p) => Parse::Cont(f(p)),
            Parse::Done(output) => Parse::Done(output),
            Parse::Error(diagnostic) => Parse::Error(diagnostic),
        }
    }

    /// Collapses to a result; a suspended parser reports an incomplete parse.
    pub fn into_result(self, mark: Mark) -> Result<P::Output, Diagnostic> {
        match self {
            Parse::Done(output) => Ok(output),
            Parse::Error(diagnostic) => Err(diagnostic),
            Parse::Cont(_) => Err(Diagnostic::new("incomplete input", mark)),
        }
    }
}

impl<P> Clone for Parse<P>
where
    P: Parser + Clone,
    P::Output: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Parse::Cont(p) => Parse::Cont(p.clone()),
            Parse::Done(output) => Parse::Done(output.clone()),
            Parse::Error(diagnostic) => Parse::Error(diagnostic.clone()),
        }
    }
}

impl<P> fmt::Debug for Parse<P>
where
    P: Parser,
    P::Output: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parse::Cont(_) => f.write_str("Cont(..)"),
            Parse::Done(output) => f.debug_tuple("Done").field(output).finish(),
            Parse::Error(diagnostic) => f.debug_tuple("Error").field(diagnostic).finish(),
        }
    }
}

/// Feeds `chunks` in order, marking every chunk but the last as partial.
pub fn parse_chunks<P: Parser>(parser: P, chunks: &[&str]) -> Result<P::Output, Diagnostic> {
    let mut state = Parse::Cont(parser);
    let mut mark = Mark::START;
    let last = chunks.len().saturating_sub(1);
    for (index, chunk) in chunks.iter().enumerate() {
        let mut input = StrInput::new(chunk).part(index < last).with_mark(mark);
        state = state.feed(&mut input);
        mark = input.mark();
        if !state.is_cont() {
            break;
        }
    }
    if chunks.is_empty() {
        state = state.feed(&mut StrInput::new(""));
    }
    state.into_result(mark)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts digits until a non-digit or the end of input.
    #[derive(Clone)]
    struct DigitCount(usize);

    impl Parser for DigitCount {
        type Output = usize;

        fn feed<I: Input>(mut self, input: &mut I) -> Parse<Self> {
            while let Some(c) = input.head() {
                if !c.is_ascii_digit() {
                    return Parse::Error(Diagnostic::expected("digit", Some(c), input.mark()));
                }
                self.0 += 1;
                input.step();
            }
            if input.is_done() {
                Parse::Done(self.0)
            } else {
                Parse::Cont(self)
            }
        }
    }

    #[test]
    fn test_suspends_between_chunks() {
        assert_eq!(parse_chunks(DigitCount(0), &["12", "", "345"]), Ok(5));
    }

    #[test]
    fn test_error_carries_mark() {
        let err = parse_chunks(DigitCount(0), &["12", "3x"]).err();
        assert_eq!(err.map(|d| d.mark), Some(Mark::new(3, 1, 4)));
    }

    #[test]
    fn test_continuations_are_independent() {
        let mut first = StrInput::new("11").part(true);
        let cont = DigitCount(0).feed(&mut first);
        let fork = cont.clone();
        let a = cont.feed(&mut StrInput::new("1"));
        let b = fork.feed(&mut StrInput::new("111"));
        assert_eq!(a.into_result(Mark::START), Ok(3));
        assert_eq!(b.into_result(Mark::START), Ok(5));
    }
}
