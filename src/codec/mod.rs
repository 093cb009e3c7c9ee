//! Incremental, non-blocking parsing and writing.
//!
//! Parsers and writers are persistent values: every `feed` or `pull`
//! consumes the current state and returns the next one, so a suspended
//! parse can be resumed with the next chunk from any point.

mod diagnostic;
mod input;
mod output;
mod parser;
mod writer;

pub use diagnostic::Diagnostic;
pub use input::{Input, Mark, StrInput};
pub use output::{Output, StringOutput};
pub use parser::{parse_chunks, Parse, Parser};
pub use writer::{write_string, TextWriter, Write, WriteError, Writer};
