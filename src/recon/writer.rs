use std::fmt::{self, Write as _};

use base64::Engine;

use crate::codec::{Output, Write, WriteError, Writer};
use crate::structure::{Expr, Field, Item, Record, Selector, UnaryOp, Value};

use super::lexer::{is_ident_char, is_ident_start};

/// Streams the Recon form of a value into a bounded [`Output`].
///
/// Brace blocks are opened as frames and their items rendered one at a time,
/// so the buffered text never exceeds the eager part of a single item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconWriter {
    root: Value,
    frames: Vec<Frame>,
    chunk: String,
    index: usize,
    written: usize,
}

/// An open brace block. Its record is reached from the root through the
/// item each outer frame last opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Frame {
    start: usize,
    next: usize,
}

impl ReconWriter {
    pub fn new(value: &Value) -> Self {
        let mut chunk = String::new();
        let mut frames = Vec::new();
        open_value(&mut chunk, &mut frames, value);
        Self { root: value.clone(), frames, chunk, index: 0, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Renders the next item, or closes the innermost block. False once
    /// every frame is closed.
    fn advance(&mut self) -> bool {
        let Some(record) = open_record(&self.root, &self.frames) else {
            return false;
        };
        let mut chunk = String::new();
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        match record.items().get(frame.next) {
            Some(item) => {
                if frame.next > frame.start {
                    chunk.push(',');
                }
                frame.next += 1;
                open_item(&mut chunk, &mut self.frames, item);
            }
            None => {
                chunk.push('}');
                self.frames.pop();
            }
        }
        self.chunk = chunk;
        self.index = 0;
        true
    }
}

fn open_record<'a>(root: &'a Value, frames: &[Frame]) -> Option<&'a Record> {
    let Value::Record(record) = root else {
        return None;
    };
    let mut record = record;
    let (_, outer) = frames.split_last()?;
    for frame in outer {
        let value = match record.items().get(frame.next.checked_sub(1)?)? {
            Item::Field(field) => field.value(),
            Item::Value(value) => value,
        };
        match value {
            Value::Record(inner) => record = inner,
            _ => return None,
        }
    }
    Some(record)
}

/// Writes `value` up to its first brace block, which is left open as a frame.
fn open_value(out: &mut String, frames: &mut Vec<Frame>, value: &Value) {
    match value {
        Value::Record(r) if r.tag().is_some() => {
            let split = write_attrs(out, r);
            match bare_body(&r.items()[split..]) {
                Some(None) => {}
                Some(Some(body)) => {
                    out.push(' ');
                    write_value(out, body);
                }
                None => {
                    out.push_str(" {");
                    frames.push(Frame { start: split, next: split });
                }
            }
        }
        Value::Record(_) => {
            out.push('{');
            frames.push(Frame { start: 0, next: 0 });
        }
        other => write_value(out, other),
    }
}

fn open_item(out: &mut String, frames: &mut Vec<Frame>, item: &Item) {
    match item {
        Item::Field(Field::Slot(key, value)) => {
            write_slot_key(out, key);
            if !value.is_extant() {
                open_value(out, frames, value);
            }
        }
        Item::Value(value) if !is_lone_attr(value) => open_value(out, frames, value),
        item => write_item(out, item),
    }
}

impl Writer for ReconWriter {
    fn pull<O: Output>(mut self, output: &mut O) -> Write<Self> {
        loop {
            if self.index < self.chunk.len() {
                if output.is_done() {
                    return Write::Error(WriteError::OutputClosed { written: self.written });
                }
                let n = output.write_str(&self.chunk[self.index..]);
                self.index += n;
                self.written += n;
                if self.index < self.chunk.len() {
                    return if output.is_done() {
                        Write::Error(WriteError::OutputClosed { written: self.written })
                    } else {
                        Write::Cont(self)
                    };
                }
            }
            if !self.advance() {
                return Write::Done;
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_value(&mut out, self);
        f.write_str(&out)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_item(&mut out, self);
        f.write_str(&out)
    }
}

pub(crate) fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => chars.all(is_ident_char) && !matches!(s, "true" | "false" | "nan" | "inf"),
        _ => false,
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if c.is_control() && (c as u32) < 0x10000 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_text(out: &mut String, s: &str) {
    if is_ident(s) {
        out.push_str(s);
    } else {
        write_string(out, s);
    }
}

/// Value in a position where a lone attribute reads as a one-attribute
/// record: documents, slot values, and argument lists.
pub(crate) fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Absent => {}
        Value::Extant => out.push_str("()"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Num(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Text(t) => write_text(out, t),
        Value::Data(d) => {
            out.push('%');
            out.push_str(&base64::engine::general_purpose::STANDARD.encode(d.as_bytes()));
        }
        Value::Record(r) if r.tag().is_some() => write_attributed(out, r),
        Value::Record(r) => write_braces(out, r),
        Value::Expr(e) => write_expr(out, e),
    }
}

/// Value as a positional block item, where a lone attribute would read back
/// as a field.
fn write_block_value(out: &mut String, value: &Value) {
    match value {
        Value::Record(r) if is_lone_attr(value) => {
            out.push('{');
            write_attributed(out, r);
            out.push('}');
        }
        other => write_value(out, other),
    }
}

pub(crate) fn write_item(out: &mut String, item: &Item) {
    match item {
        Item::Field(Field::Attr(name, value)) => write_attr(out, name, value),
        Item::Field(Field::Slot(key, value)) => {
            write_slot_key(out, key);
            if !value.is_extant() {
                write_value(out, value);
            }
        }
        Item::Value(value) => write_block_value(out, value),
    }
}

fn write_slot_key(out: &mut String, key: &Value) {
    match key {
        Value::Expr(e) if matches!(**e, Expr::Selector(_)) || e.precedence() <= 2 => {
            out.push('(');
            write_expr(out, e);
            out.push(')');
        }
        key => write_value(out, key),
    }
    out.push(':');
}

fn write_items(out: &mut String, items: &[Item]) {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_item(out, item);
    }
}

fn write_braces(out: &mut String, record: &Record) {
    out.push('{');
    write_items(out, record.items());
    out.push('}');
}

fn write_attr(out: &mut String, name: &str, value: &Value) {
    out.push('@');
    write_text_or_quoted(out, name);
    if !value.is_extant() {
        out.push('(');
        write_args(out, value, &Value::Extant);
        out.push(')');
    }
}

fn write_text_or_quoted(out: &mut String, name: &str) {
    let bare = name.chars().next().is_some_and(is_ident_start) && name.chars().all(is_ident_char);
    if bare {
        out.push_str(name);
    } else {
        write_string(out, name);
    }
}

/// Leading attributes, then the remaining items: bare when they are a single
/// non-record value, otherwise in braces.
fn write_attributed(out: &mut String, record: &Record) {
    let split = write_attrs(out, record);
    let rest = &record.items()[split..];
    match bare_body(rest) {
        Some(None) => {}
        Some(Some(value)) => {
            out.push(' ');
            write_value(out, value);
        }
        None => {
            out.push_str(" {");
            write_items(out, rest);
            out.push('}');
        }
    }
}

/// Writes the leading attributes and returns where the body starts.
fn write_attrs(out: &mut String, record: &Record) -> usize {
    let items = record.items();
    let split = items.iter().position(|item| !item.is_attr()).unwrap_or(items.len());
    for item in &items[..split] {
        if let Item::Field(Field::Attr(name, value)) = item {
            write_attr(out, name, value);
        }
    }
    split
}

/// A body written without braces: nothing, or one plain value. `None` when
/// it needs a brace block.
fn bare_body(rest: &[Item]) -> Option<Option<&Value>> {
    match rest {
        [] => Some(None),
        [Item::Value(value)] if !matches!(value, Value::Record(_) | Value::Absent) => Some(Some(value)),
        _ => None,
    }
}

fn is_lone_attr(value: &Value) -> bool {
    matches!(value, Value::Record(r) if r.len() == 1 && r.tag().is_some())
}

/// Contents of a parenthesized argument list. `empty` is the value an empty
/// list reads back as.
fn write_args(out: &mut String, value: &Value, empty: &Value) {
    match value {
        v if v == empty => {}
        Value::Record(r) if r.is_empty() => out.push_str("{}"),
        Value::Record(r) if r.tag().is_some() => write_attributed(out, r),
        Value::Record(r) if r.len() == 1 && !r.items()[0].is_field() => write_braces(out, r),
        Value::Record(r) => write_items(out, r.items()),
        other => write_value(out, other),
    }
}

fn precedence(value: &Value) -> u8 {
    match value {
        Value::Expr(e) => e.precedence(),
        Value::Record(r) if r.tag().is_some() => 0,
        _ => 13,
    }
}

fn write_operand(out: &mut String, value: &Value, min: u8) {
    if precedence(value) < min {
        out.push('(');
        write_value(out, value);
        out.push(')');
    } else {
        write_value(out, value);
    }
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Selector(selector) => write_selector(out, selector),
        Expr::Binary(op, lhs, rhs) => {
            write_operand(out, lhs, op.precedence());
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            write_operand(out, rhs, op.precedence() + 1);
        }
        Expr::Unary(op, operand) => {
            out.push_str(op.symbol());
            let literal = matches!(operand, Value::Num(_));
            if literal && matches!(op, UnaryOp::Negative) {
                // A minus directly before a literal folds into the number.
                out.push('(');
                write_value(out, operand);
                out.push(')');
            } else {
                write_operand(out, operand, 12);
            }
        }
        Expr::Conditional(cond, then, otherwise) => {
            write_operand(out, cond, 3);
            out.push_str(" ? ");
            write_operand(out, then, 2);
            out.push_str(" : ");
            write_operand(out, otherwise, 2);
        }
        Expr::Lambda(bindings, template) => {
            write_operand(out, bindings, 2);
            out.push_str(" >> ");
            write_operand(out, template, 1);
        }
        Expr::Invoke(func, args) => {
            write_operand(out, func, 13);
            out.push('(');
            write_args(out, args, &Value::Absent);
            out.push(')');
        }
    }
}

fn write_selector(out: &mut String, selector: &Selector) {
    if matches!(selector, Selector::Identity) {
        out.push('$');
        return;
    }
    let mut first = true;
    let mut step = selector;
    loop {
        let prefix = if first { "$" } else { "." };
        step = match step {
            Selector::Identity => return,
            Selector::Get(key, then) => {
                out.push_str(prefix);
                match key {
                    Value::Text(t) => write_text(out, t),
                    other => write_value(out, other),
                }
                &**then
            }
            Selector::GetAttr(key, then) => {
                out.push_str(prefix);
                out.push('@');
                write_text_or_quoted(out, key);
                &**then
            }
            Selector::GetItem(index, then) => {
                let _ = write!(out, "{}#{}", prefix, index);
                &**then
            }
            Selector::Keys(then) => {
                out.push_str(prefix);
                out.push_str("*:");
                &**then
            }
            Selector::Values(then) => {
                out.push_str(prefix);
                out.push_str(":*");
                &**then
            }
            Selector::Children(then) => {
                out.push_str(prefix);
                out.push('*');
                &**then
            }
            Selector::Descendants(then) => {
                out.push_str(prefix);
                out.push_str("**");
                &**then
            }
            Selector::Filter(predicate, then) => {
                if first {
                    out.push('$');
                }
                out.push('[');
                write_args(out, predicate, &Value::Extant);
                out.push(']');
                &**then
            }
        };
        first = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse_chunks, write_string as drain, StringOutput};
    use crate::recon::ReconParser;
    use crate::structure::{BinaryOp, Num};
    use proptest::prelude::*;

    fn reparse(value: &Value) -> Value {
        let text = value.to_string();
        parse_chunks(ReconParser::new(), &[&text]).unwrap_or_else(|e| panic!("{}: {}", text, e))
    }

    fn rec(items: Vec<Item>) -> Value {
        Value::Record(Record::of(items))
    }

    #[test]
    fn test_envelope_shape() {
        let value = rec(vec![
            Item::attr("event", rec(vec![Item::slot("node", "/house"), Item::slot("lane", "light")])),
            Item::from("on"),
        ]);
        assert_eq!(value.to_string(), "@event(node:\"/house\",lane:light) on");
    }

    #[test]
    fn test_attribute_forms() {
        assert_eq!(rec(vec![Item::attr("a", Value::Extant)]).to_string(), "@a");
        assert_eq!(rec(vec![Item::attr("a", rec(vec![Item::from(1)]))]).to_string(), "@a({1})");
        assert_eq!(
            rec(vec![Item::from(rec(vec![Item::attr("a", Value::Extant)]))]).to_string(),
            "{{@a}}"
        );
        assert_eq!(
            rec(vec![Item::attr("a", Value::Extant), Item::from(1), Item::from(2)]).to_string(),
            "@a {1,2}"
        );
    }

    #[test]
    fn test_scalars() {
        assert_eq!(Value::Absent.to_string(), "");
        assert_eq!(Value::Extant.to_string(), "()");
        assert_eq!(Value::text("true").to_string(), "\"true\"");
        assert_eq!(Value::text("a b\n").to_string(), "\"a b\\n\"");
        assert_eq!(Value::from(2.0).to_string(), "2.0");
        assert_eq!(Value::data(vec![1u8, 2]).to_string(), "%AQI=");
        assert_eq!(Value::text("nan").to_string(), "\"nan\"");
        assert_eq!(Value::text("inf").to_string(), "\"inf\"");
        assert_eq!(rec(vec![Item::slot("k", Value::Extant)]).to_string(), "{k:}");
    }

    #[test]
    fn test_non_finite_floats_read_back() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let value = Value::from(f);
            assert_eq!(reparse(&value), value, "{}", value);
        }
        assert_eq!(Value::from(f64::NEG_INFINITY).to_string(), "-inf");
        let record = rec(vec![Item::slot("inf", f64::INFINITY), Item::Value(Value::text("nan"))]);
        assert_eq!(reparse(&record), record);
    }

    #[test]
    fn test_expressions_keep_structure() {
        let values = [
            Value::expr(Expr::binary(
                BinaryOp::Times,
                Value::expr(Expr::binary(BinaryOp::Plus, 1, 2)),
                3,
            )),
            Value::expr(Expr::binary(
                BinaryOp::Minus,
                "a",
                Value::expr(Expr::binary(BinaryOp::Minus, "b", "c")),
            )),
            Value::expr(Expr::unary(UnaryOp::Negative, 2)),
            Value::expr(Expr::binary(BinaryOp::Minus, "a", -2)),
            Value::expr(Expr::conditional(Value::expr(Expr::conditional("a", "b", "c")), "d", "e")),
            Value::expr(Expr::Lambda("x".into(), Value::expr(Expr::binary(BinaryOp::Modulo, "x", 2)))),
            Value::expr(Expr::Invoke(Selector::get("f").into(), rec(vec![Item::from(1), Item::from(2)]))),
            Value::from(Selector::Children(Box::new(Selector::get("a").and_then(Selector::Keys(
                Box::new(Selector::Identity),
            ))))),
            rec(vec![Item::slot(Selector::Children(Box::new(Selector::Identity)), 1)]),
        ];
        for value in values {
            assert_eq!(reparse(&value), value, "{}", value);
        }
    }

    #[test]
    fn test_pull_into_bounded_output() {
        let value = rec(vec![Item::attr("command", rec(vec![Item::slot("node", "a")])), Item::from(42)]);
        let mut output = StringOutput::bounded(3);
        let mut text = String::new();
        let mut state = Write::Cont(ReconWriter::new(&value));
        while state.is_cont() {
            state = state.pull(&mut output);
            text.push_str(&output.take());
        }
        assert_eq!(Ok(text), drain(ReconWriter::new(&value)));
    }

    #[test]
    fn test_pull_buffers_one_item_at_a_time() {
        let rows: Vec<Item> = (0..500)
            .map(|i| Item::from(rec(vec![Item::slot("id", i), Item::slot("name", "row")])))
            .collect();
        let value = rec(vec![Item::attr("event", Value::Extant), Item::slot("rows", rec(rows))]);
        let mut output = StringOutput::bounded(16);
        let mut text = String::new();
        let mut state = Write::Cont(ReconWriter::new(&value));
        while let Write::Cont(writer) = &state {
            assert!(writer.chunk.len() < 32, "{:?}", writer.chunk);
            assert!(writer.frames.len() <= 3);
            state = state.pull(&mut output);
            text.push_str(&output.take());
        }
        assert!(state.is_done());
        assert!(text.starts_with("@event {rows:{{id:0,name:row},{id:1,"));
        assert_eq!(text, value.to_string());
    }

    #[test]
    fn test_pull_reports_closed_output() {
        let value = rec(vec![Item::from(1), Item::from(2), Item::from(3)]);
        let mut output = StringOutput::bounded(2);
        let state = Write::Cont(ReconWriter::new(&value)).pull(&mut output);
        assert!(state.is_cont());
        output.close();
        assert_eq!(state.pull(&mut output), Write::Error(WriteError::OutputClosed { written: 2 }));
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Extant),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            (-1.0e12f64..1.0e12).prop_map(|f| Value::Num(Num::Float(f))),
            prop_oneof![Just(f64::NAN), Just(f64::INFINITY), Just(f64::NEG_INFINITY)]
                .prop_map(|f| Value::Num(Num::Float(f))),
            "\\PC*".prop_map(|s: String| Value::text(s)),
            prop::collection::vec(any::<u8>(), 0..8).prop_map(|bytes| Value::data(bytes)),
        ]
    }

    fn structure() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            let item = prop_oneof![
                inner.clone().prop_map(Item::Value),
                ("[a-z]{1,4}", inner.clone()).prop_map(|(k, v)| Item::attr(k, v)),
                (leaf(), inner.clone()).prop_map(|(k, v)| Item::slot(k, v)),
            ];
            prop::collection::vec(item, 0..4).prop_map(|items| Value::Record(Record::of(items)))
        })
    }

    proptest! {
        #[test]
        fn test_round_trip(value in structure()) {
            let text = value.to_string();
            let parsed = parse_chunks(ReconParser::new(), &[&text]);
            prop_assert_eq!(parsed, Ok(value), "{}", text);
        }

        #[test]
        fn test_streamed_matches_display(value in structure(), limit in 1usize..8) {
            let mut output = StringOutput::bounded(limit);
            let mut text = String::new();
            let mut state = Write::Cont(ReconWriter::new(&value));
            while state.is_cont() {
                state = state.pull(&mut output);
                text.push_str(&output.take());
            }
            prop_assert!(state.is_done());
            prop_assert_eq!(text, value.to_string());
        }
    }
}
