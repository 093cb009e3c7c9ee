//! Recon: the text notation for structure values.
//!
//! ```text
//! @event(node:"/house/kitchen",lane:light) {brightness: 0.8, on: true}
//! ```

mod lexer;
mod parser;
mod writer;

pub use parser::ReconParser;
pub use writer::ReconWriter;

use crate::codec::{parse_chunks, Diagnostic};
use crate::structure::Value;

/// Parses a complete Recon document.
pub fn parse(text: &str) -> Result<Value, Diagnostic> {
    parse_chunks(ReconParser::new(), &[text])
}

/// Renders `value` as a Recon document.
pub fn write(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Item, Record};

    #[test]
    fn test_parse_then_write() {
        let text = "@link(node:\"/unit/1\",lane:info,prio:0.5)";
        let value = parse(text);
        assert_eq!(value.as_ref().map(write).ok().as_deref(), Some(text));
    }

    #[test]
    fn test_writes_back_canonically() {
        let value = parse("{ a : 1 ,\n b: \"x\" }");
        assert_eq!(
            value,
            Ok(Value::Record(Record::of([Item::slot("a", 1), Item::slot("b", "x")])))
        );
        assert_eq!(value.map(|v| write(&v)).ok().as_deref(), Some("{a:1,b:x}"));
    }
}
