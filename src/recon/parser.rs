use crate::codec::{Diagnostic, Input, Mark, Parse, Parser};
use crate::structure::{BinaryOp, Expr, Field, Item, Num, Record, Selector, Text, UnaryOp, Value};

use super::lexer::{Lexer, Token, TokenKind};

/// Incremental Recon parser.
///
/// Tokens from the [`Lexer`] drive an explicit stack of frames, so the
/// parser can suspend between any two characters and resume with the next
/// chunk. Each intermediate state is an independent value.
#[derive(Clone, Debug)]
pub struct ReconParser {
    lexer: Lexer,
    stack: Vec<Frame>,
    result: Option<Value>,
}

impl Default for ReconParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconParser {
    /// Parser for a whole document: a sequence of items up to end of input.
    pub fn new() -> Self {
        Self {
            lexer: Lexer::new(),
            stack: vec![Frame::Block(BlockFrame::new(BlockKind::Document))],
            result: None,
        }
    }

    fn dispatch(&mut self, token: Token) -> Result<(), Diagnostic> {
        let mut pending = Some(token);
        while let Some(token) = pending.take() {
            let Some(frame) = self.stack.pop() else {
                return Err(Diagnostic::new("trailing input", token.mark));
            };
            match frame.on_token(&token)? {
                Step::Stay(frame) => self.stack.push(frame),
                Step::Push(frame, child) => {
                    self.stack.push(frame);
                    self.stack.push(child);
                    pending = Some(token);
                }
                Step::Open(frame, child) => {
                    self.stack.push(frame);
                    self.stack.push(child);
                }
                Step::Pop(outcome) => {
                    self.deliver(outcome, token.mark)?;
                    pending = Some(token);
                }
                Step::Close(outcome) => self.deliver(outcome, token.mark)?,
            }
        }
        Ok(())
    }

    fn deliver(&mut self, mut outcome: Outcome, mark: Mark) -> Result<(), Diagnostic> {
        loop {
            let Some(parent) = self.stack.pop() else {
                return match outcome {
                    Outcome::Value(value) => {
                        self.result = Some(value);
                        Ok(())
                    }
                    _ => Err(Diagnostic::new("malformed document", mark)),
                };
            };
            match parent.on_result(outcome, mark)? {
                Resume::Stay(frame) => {
                    self.stack.push(frame);
                    return Ok(());
                }
                Resume::Pop(next) => outcome = next,
            }
        }
    }
}

impl Parser for ReconParser {
    type Output = Value;

    fn feed<I: Input>(mut self, input: &mut I) -> Parse<Self> {
        let mut tokens = Vec::new();
        if let Err(diagnostic) = self.lexer.lex(input, &mut tokens) {
            return Parse::Error(diagnostic);
        }
        for token in tokens {
            if let Err(diagnostic) = self.dispatch(token) {
                return Parse::Error(diagnostic);
            }
        }
        match self.result.take() {
            Some(value) => Parse::Done(value),
            None => Parse::Cont(self),
        }
    }
}

/// What a finished frame hands to its parent.
#[derive(Clone, Debug)]
enum Outcome {
    Value(Value),
    Item(Option<Item>),
    Expr(Option<Value>),
}

enum Step {
    /// Token consumed; frame stays on top.
    Stay(Frame),
    /// Token handed on to a new child frame.
    Push(Frame, Frame),
    /// Token consumed by opening a new child frame.
    Open(Frame, Frame),
    /// Frame finished without consuming the token.
    Pop(Outcome),
    /// Frame finished by consuming the token.
    Close(Outcome),
}

enum Resume {
    Stay(Frame),
    Pop(Outcome),
}

#[derive(Clone, Debug)]
enum Frame {
    Block(BlockFrame),
    Item(ItemFrame),
    Attrs(AttrsFrame),
    Expr(ExprFrame),
    Selector(SelectorFrame),
}

impl Frame {
    fn on_token(self, token: &Token) -> Result<Step, Diagnostic> {
        match self {
            Frame::Block(frame) => frame.on_token(token),
            Frame::Item(frame) => frame.on_token(token),
            Frame::Attrs(frame) => frame.on_token(token),
            Frame::Expr(frame) => frame.on_token(token),
            Frame::Selector(frame) => frame.on_token(token),
        }
    }

    fn on_result(self, outcome: Outcome, mark: Mark) -> Result<Resume, Diagnostic> {
        match (self, outcome) {
            (Frame::Block(frame), Outcome::Item(item)) => Ok(frame.on_item(item)),
            (Frame::Item(frame), Outcome::Item(item)) => frame.on_item(item),
            (Frame::Attrs(frame), outcome) => frame.on_result(outcome, mark),
            (Frame::Expr(frame), Outcome::Value(value)) => Ok(frame.on_operand(value)),
            (Frame::Selector(frame), Outcome::Value(value)) => frame.on_block(value, mark),
            _ => Err(Diagnostic::new("malformed document", mark)),
        }
    }
}

fn is_terminator(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Newline
            | TokenKind::Comma
            | TokenKind::Semicolon
            | TokenKind::Colon
            | TokenKind::RBrace
            | TokenKind::RParen
            | TokenKind::RBracket
            | TokenKind::End
    )
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::End => "end of input".to_string(),
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Ident(s) => format!("identifier {:?}", s),
        TokenKind::Str(s) => format!("string {:?}", s),
        TokenKind::Num(s) => format!("number {}", s),
        TokenKind::At(s) => format!("attribute @{}", s),
        TokenKind::Data(_) => "data".to_string(),
        other => format!("{:?}", other),
    }
}

fn unexpected(token: &Token) -> Diagnostic {
    Diagnostic::new(format!("unexpected {}", describe(&token.kind)), token.mark)
}

fn expected(what: &str, token: &Token) -> Diagnostic {
    Diagnostic::new(format!("expected {}, but found {}", what, describe(&token.kind)), token.mark)
}

/// Converts a numeric literal, folding in a preceding minus sign.
fn number(text: &str, negative: bool, mark: Mark) -> Result<Value, Diagnostic> {
    let invalid = || Diagnostic::new(format!("invalid number {}", text), mark);
    let num = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let bits = u64::from_str_radix(hex, 16).map_err(|_| invalid())?;
        let n = bits as i64;
        Num::Int(if negative { n.wrapping_neg() } else { n })
    } else if text.contains(|c| matches!(c, '.' | 'e' | 'E')) {
        let f: f64 = text.parse().map_err(|_| invalid())?;
        Num::Float(if negative { -f } else { f })
    } else {
        let signed = if negative { format!("-{}", text) } else { text.to_string() };
        match signed.parse::<i64>() {
            Ok(n) => Num::Int(n),
            Err(_) => Num::Float(signed.parse().map_err(|_| invalid())?),
        }
    };
    Ok(Value::Num(num))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BlockKind {
    Document,
    Record,
    Group,
    AttrArgs,
    Args,
    Filter,
}

impl BlockKind {
    fn closes(self, kind: &TokenKind) -> bool {
        matches!(
            (self, kind),
            (BlockKind::Document, TokenKind::End)
                | (BlockKind::Record, TokenKind::RBrace)
                | (BlockKind::Group | BlockKind::AttrArgs | BlockKind::Args, TokenKind::RParen)
                | (BlockKind::Filter, TokenKind::RBracket)
        )
    }

    fn closer(self) -> &'static str {
        match self {
            BlockKind::Document => "end of input",
            BlockKind::Record => "'}'",
            BlockKind::Group | BlockKind::AttrArgs | BlockKind::Args => "')'",
            BlockKind::Filter => "']'",
        }
    }
}

#[derive(Clone, Debug)]
struct BlockFrame {
    kind: BlockKind,
    items: Vec<Item>,
    after_item: bool,
}

impl BlockFrame {
    fn new(kind: BlockKind) -> Self {
        Self { kind, items: Vec::new(), after_item: false }
    }

    fn on_token(mut self, token: &Token) -> Result<Step, Diagnostic> {
        if self.kind.closes(&token.kind) {
            return Ok(Step::Close(Outcome::Value(self.finish())));
        }
        match token.kind {
            TokenKind::Newline | TokenKind::Comma | TokenKind::Semicolon => {
                self.after_item = false;
                Ok(Step::Stay(Frame::Block(self)))
            }
            TokenKind::End => Err(expected(self.kind.closer(), token)),
            TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => Err(unexpected(token)),
            _ if self.after_item => Err(expected("',', ';' or newline", token)),
            _ => Ok(Step::Push(Frame::Block(self), Frame::Item(ItemFrame::Start))),
        }
    }

    fn on_item(mut self, item: Option<Item>) -> Resume {
        if let Some(item) = item {
            self.items.push(item);
            self.after_item = true;
        }
        Resume::Stay(Frame::Block(self))
    }

    fn finish(self) -> Value {
        let empty = match self.kind {
            BlockKind::Record => return Value::Record(Record::of(self.items)),
            BlockKind::Document | BlockKind::Args => Value::Absent,
            BlockKind::Group | BlockKind::AttrArgs | BlockKind::Filter => Value::Extant,
        };
        let mut items = self.items;
        match items.len() {
            0 => empty,
            1 if !items[0].is_field() => items.pop().map(Item::into_value).unwrap_or(empty),
            _ => Value::Record(Record::of(items)),
        }
    }
}

/// One block item: a value, a lone attribute, or `key: value`.
#[derive(Clone, Debug)]
enum ItemFrame {
    Start,
    AwaitKey,
    AfterKey(Option<Item>),
    AwaitValue(Value),
}

impl ItemFrame {
    fn on_token(self, token: &Token) -> Result<Step, Diagnostic> {
        match self {
            ItemFrame::Start => Ok(Step::Push(
                Frame::Item(ItemFrame::AwaitKey),
                Frame::Attrs(AttrsFrame::new(true)),
            )),
            ItemFrame::AfterKey(key) => match token.kind {
                TokenKind::Colon => {
                    let key = match key {
                        Some(Item::Value(value)) => value,
                        Some(Item::Field(field)) => Value::Record(Record::of([Item::Field(field)])),
                        None => return Err(expected("slot key", token)),
                    };
                    Ok(Step::Open(
                        Frame::Item(ItemFrame::AwaitValue(key)),
                        Frame::Attrs(AttrsFrame::new(false)),
                    ))
                }
                _ => Ok(Step::Pop(Outcome::Item(key))),
            },
            ItemFrame::AwaitKey | ItemFrame::AwaitValue(_) => Err(unexpected(token)),
        }
    }

    fn on_item(self, item: Option<Item>) -> Result<Resume, Diagnostic> {
        match self {
            ItemFrame::AwaitKey => Ok(Resume::Stay(Frame::Item(ItemFrame::AfterKey(item)))),
            ItemFrame::AwaitValue(key) => {
                let value = item.map(Item::into_value).unwrap_or(Value::Extant);
                Ok(Resume::Pop(Outcome::Item(Some(Item::slot(key, value)))))
            }
            _ => Err(Diagnostic::new("malformed item", Mark::START)),
        }
    }
}

#[derive(Clone, Debug)]
enum AttrsStage {
    Attrs,
    AwaitArgs(Text),
    AwaitExpr,
}

/// Leading attributes followed by an optional value.
#[derive(Clone, Debug)]
struct AttrsFrame {
    attrs: Vec<Field>,
    pending: Option<Text>,
    stage: AttrsStage,
    /// A lone attribute here is a field rather than a one-attribute record.
    block_item: bool,
}

impl AttrsFrame {
    fn new(block_item: bool) -> Self {
        Self { attrs: Vec::new(), pending: None, stage: AttrsStage::Attrs, block_item }
    }

    fn on_token(mut self, token: &Token) -> Result<Step, Diagnostic> {
        if let Some(name) = self.pending.take() {
            if token.kind == TokenKind::LParen && !token.spaced {
                self.stage = AttrsStage::AwaitArgs(name);
                return Ok(Step::Open(
                    Frame::Attrs(self),
                    Frame::Block(BlockFrame::new(BlockKind::AttrArgs)),
                ));
            }
            self.attrs.push(Field::Attr(name, Value::Extant));
        }
        match &token.kind {
            TokenKind::At(name) => {
                self.pending = Some(Text::from(name.as_str()));
                Ok(Step::Stay(Frame::Attrs(self)))
            }
            TokenKind::Newline if !self.attrs.is_empty() => Ok(Step::Pop(Outcome::Item(self.finish(None)))),
            _ => {
                self.stage = AttrsStage::AwaitExpr;
                Ok(Step::Push(Frame::Attrs(self), Frame::Expr(ExprFrame::new())))
            }
        }
    }

    fn on_result(mut self, outcome: Outcome, mark: Mark) -> Result<Resume, Diagnostic> {
        match (self.stage, outcome) {
            (AttrsStage::AwaitArgs(name), Outcome::Value(args)) => {
                self.attrs.push(Field::Attr(name, args));
                self.stage = AttrsStage::Attrs;
                Ok(Resume::Stay(Frame::Attrs(self)))
            }
            (AttrsStage::AwaitExpr, Outcome::Expr(value)) => {
                self.stage = AttrsStage::AwaitExpr;
                Ok(Resume::Pop(Outcome::Item(self.finish(value))))
            }
            _ => Err(Diagnostic::new("malformed attribute", mark)),
        }
    }

    fn finish(self, value: Option<Value>) -> Option<Item> {
        if self.attrs.is_empty() {
            return value.map(Item::Value);
        }
        if self.block_item && self.attrs.len() == 1 && value.is_none() {
            return self.attrs.into_iter().next().map(Item::Field);
        }
        let mut record: Record = self.attrs.into_iter().map(Item::Field).collect();
        match value {
            Some(Value::Record(body)) => record.extend(body.into_items()),
            Some(value) => record.push(value),
            None => {}
        }
        Some(Item::Value(Value::Record(record)))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PendingOp {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Question,
    Colon,
    Lambda,
}

impl PendingOp {
    fn precedence(self) -> u8 {
        match self {
            PendingOp::Lambda => 1,
            PendingOp::Question | PendingOp::Colon => 2,
            PendingOp::Binary(op) => op.precedence(),
            PendingOp::Unary(_) => 12,
        }
    }
}

/// Operator-precedence expression parser.
#[derive(Clone, Debug)]
struct ExprFrame {
    operands: Vec<Value>,
    ops: Vec<(PendingOp, Mark)>,
    expect_operand: bool,
}

impl ExprFrame {
    fn new() -> Self {
        Self { operands: Vec::new(), ops: Vec::new(), expect_operand: true }
    }

    fn is_empty(&self) -> bool {
        self.operands.is_empty() && self.ops.is_empty()
    }

    fn on_token(self, token: &Token) -> Result<Step, Diagnostic> {
        if self.expect_operand {
            self.operand(token)
        } else {
            self.operator(token)
        }
    }

    fn operand(mut self, token: &Token) -> Result<Step, Diagnostic> {
        let value = match &token.kind {
            TokenKind::Newline if self.is_empty() => return Ok(Step::Pop(Outcome::Expr(None))),
            TokenKind::Newline => return Ok(Step::Stay(Frame::Expr(self))),
            TokenKind::Binary(BinaryOp::Minus) => return self.prefix(UnaryOp::Negative, token),
            TokenKind::Binary(BinaryOp::Plus) => return self.prefix(UnaryOp::Positive, token),
            TokenKind::Not => return self.prefix(UnaryOp::Not, token),
            TokenKind::Tilde => return self.prefix(UnaryOp::BitNot, token),
            TokenKind::Num(text) => {
                let negative = self.take_negative();
                number(text, negative, token.mark)?
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "nan" => Value::Num(Num::Float(f64::NAN)),
                "inf" => {
                    let sign = if self.take_negative() { -1.0 } else { 1.0 };
                    Value::Num(Num::Float(sign * f64::INFINITY))
                }
                _ => Value::text(name.as_str()),
            },
            TokenKind::Str(text) => Value::text(text.as_str()),
            TokenKind::Data(bytes) => Value::data(bytes.clone()),
            TokenKind::LBrace => {
                return Ok(Step::Open(Frame::Expr(self), Frame::Block(BlockFrame::new(BlockKind::Record))))
            }
            TokenKind::LParen => {
                return Ok(Step::Open(Frame::Expr(self), Frame::Block(BlockFrame::new(BlockKind::Group))))
            }
            TokenKind::Dollar => {
                return Ok(Step::Open(Frame::Expr(self), Frame::Selector(SelectorFrame::new())))
            }
            TokenKind::At(_) => {
                return Err(Diagnostic::new("attributes must lead their value", token.mark))
            }
            kind if is_terminator(kind) && self.is_empty() => return Ok(Step::Pop(Outcome::Expr(None))),
            _ => return Err(expected("value", token)),
        };
        self.operands.push(value);
        self.expect_operand = false;
        Ok(Step::Stay(Frame::Expr(self)))
    }

    /// Folds a pending unary minus into the literal that follows it.
    fn take_negative(&mut self) -> bool {
        let negative = matches!(self.ops.last(), Some((PendingOp::Unary(UnaryOp::Negative), _)));
        if negative {
            self.ops.pop();
        }
        negative
    }

    fn prefix(mut self, op: UnaryOp, token: &Token) -> Result<Step, Diagnostic> {
        self.ops.push((PendingOp::Unary(op), token.mark));
        Ok(Step::Stay(Frame::Expr(self)))
    }

    fn operator(mut self, token: &Token) -> Result<Step, Diagnostic> {
        let (op, assoc_left) = match token.kind {
            TokenKind::Binary(op) => (PendingOp::Binary(op), true),
            TokenKind::Question => (PendingOp::Question, false),
            TokenKind::Arrow => (PendingOp::Lambda, false),
            TokenKind::Colon if self.ops.iter().any(|(op, _)| *op == PendingOp::Question) => {
                while !matches!(self.ops.last(), Some((PendingOp::Question, _))) {
                    self.apply()?;
                }
                self.ops.pop();
                self.ops.push((PendingOp::Colon, token.mark));
                self.expect_operand = true;
                return Ok(Step::Stay(Frame::Expr(self)));
            }
            _ => {
                while !self.ops.is_empty() {
                    self.apply()?;
                }
                let value = self.operands.pop();
                if !self.operands.is_empty() {
                    return Err(Diagnostic::new("malformed expression", token.mark));
                }
                return Ok(Step::Pop(Outcome::Expr(value)));
            }
        };
        self.reduce(op.precedence(), assoc_left)?;
        self.ops.push((op, token.mark));
        self.expect_operand = true;
        Ok(Step::Stay(Frame::Expr(self)))
    }

    fn reduce(&mut self, precedence: u8, assoc_left: bool) -> Result<(), Diagnostic> {
        while let Some((top, _)) = self.ops.last() {
            let p = top.precedence();
            if p > precedence || (assoc_left && p == precedence) {
                self.apply()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn apply(&mut self) -> Result<(), Diagnostic> {
        let Some((op, mark)) = self.ops.pop() else {
            return Ok(());
        };
        let missing = || Diagnostic::new("missing operand", mark);
        let expr = match op {
            PendingOp::Unary(op) => {
                let operand = self.operands.pop().ok_or_else(missing)?;
                Expr::Unary(op, operand)
            }
            PendingOp::Binary(op) => {
                let rhs = self.operands.pop().ok_or_else(missing)?;
                let lhs = self.operands.pop().ok_or_else(missing)?;
                Expr::Binary(op, lhs, rhs)
            }
            PendingOp::Lambda => {
                let template = self.operands.pop().ok_or_else(missing)?;
                let bindings = self.operands.pop().ok_or_else(missing)?;
                Expr::Lambda(bindings, template)
            }
            PendingOp::Colon => {
                let otherwise = self.operands.pop().ok_or_else(missing)?;
                let then = self.operands.pop().ok_or_else(missing)?;
                let cond = self.operands.pop().ok_or_else(missing)?;
                Expr::Conditional(cond, then, otherwise)
            }
            PendingOp::Question => return Err(Diagnostic::new("expected ':' to complete '?'", mark)),
        };
        self.operands.push(Value::expr(expr));
        Ok(())
    }

    fn on_operand(mut self, value: Value) -> Resume {
        self.operands.push(value);
        self.expect_operand = false;
        Resume::Stay(Frame::Expr(self))
    }
}

#[derive(Clone, Debug)]
enum SelectorStep {
    Get(Value),
    GetAttr(Text),
    GetItem(usize),
    Keys,
    Values,
    Children,
    Descendants,
    Filter(Value),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SelectorStage {
    AfterDollar,
    AfterDot,
    AfterStep,
    Star,
    Colon,
    Hash,
    AwaitFilter,
    AwaitArgs,
}

/// `$`-rooted path, optionally invoked with arguments.
#[derive(Clone, Debug)]
struct SelectorFrame {
    steps: Vec<SelectorStep>,
    stage: SelectorStage,
}

impl SelectorFrame {
    fn new() -> Self {
        Self { steps: Vec::new(), stage: SelectorStage::AfterDollar }
    }

    fn selector(&self) -> Selector {
        self.steps.iter().rev().fold(Selector::Identity, |then, step| {
            let then = Box::new(then);
            match step.clone() {
                SelectorStep::Get(key) => Selector::Get(key, then),
                SelectorStep::GetAttr(key) => Selector::GetAttr(key, then),
                SelectorStep::GetItem(index) => Selector::GetItem(index, then),
                SelectorStep::Keys => Selector::Keys(then),
                SelectorStep::Values => Selector::Values(then),
                SelectorStep::Children => Selector::Children(then),
                SelectorStep::Descendants => Selector::Descendants(then),
                SelectorStep::Filter(predicate) => Selector::Filter(predicate, then),
            }
        })
    }

    fn step(mut self, step: SelectorStep) -> Result<Step, Diagnostic> {
        self.steps.push(step);
        self.stage = SelectorStage::AfterStep;
        Ok(Step::Stay(Frame::Selector(self)))
    }

    fn stage(mut self, stage: SelectorStage) -> Result<Step, Diagnostic> {
        self.stage = stage;
        Ok(Step::Stay(Frame::Selector(self)))
    }

    fn finish(self) -> Result<Step, Diagnostic> {
        Ok(Step::Pop(Outcome::Value(self.selector().into())))
    }

    fn on_token(mut self, token: &Token) -> Result<Step, Diagnostic> {
        let joined = !token.spaced;
        match self.stage {
            SelectorStage::AfterDollar | SelectorStage::AfterDot if joined => match &token.kind {
                TokenKind::Ident(key) | TokenKind::Str(key) => {
                    self.step(SelectorStep::Get(Value::text(key.as_str())))
                }
                TokenKind::At(key) => self.step(SelectorStep::GetAttr(Text::from(key.as_str()))),
                TokenKind::Hash => self.stage(SelectorStage::Hash),
                TokenKind::Binary(BinaryOp::Times) => self.stage(SelectorStage::Star),
                TokenKind::Colon => self.stage(SelectorStage::Colon),
                TokenKind::LBracket if self.stage == SelectorStage::AfterDollar => {
                    self.stage = SelectorStage::AwaitFilter;
                    Ok(Step::Open(Frame::Selector(self), Frame::Block(BlockFrame::new(BlockKind::Filter))))
                }
                _ if self.stage == SelectorStage::AfterDollar => self.finish(),
                _ => Err(expected("selector", token)),
            },
            SelectorStage::AfterDollar => self.finish(),
            SelectorStage::AfterDot => Err(expected("selector", token)),
            SelectorStage::Hash => match &token.kind {
                TokenKind::Num(text) if joined => {
                    let index = text
                        .parse::<usize>()
                        .map_err(|_| Diagnostic::new(format!("invalid index {}", text), token.mark))?;
                    self.step(SelectorStep::GetItem(index))
                }
                _ => Err(expected("index", token)),
            },
            SelectorStage::Star => match token.kind {
                TokenKind::Binary(BinaryOp::Times) if joined => self.step(SelectorStep::Descendants),
                TokenKind::Colon if joined => self.step(SelectorStep::Keys),
                _ => {
                    self.steps.push(SelectorStep::Children);
                    self.stage = SelectorStage::AfterStep;
                    self.on_token(token)
                }
            },
            SelectorStage::Colon => match token.kind {
                TokenKind::Binary(BinaryOp::Times) if joined => self.step(SelectorStep::Values),
                _ => Err(expected("'*'", token)),
            },
            SelectorStage::AfterStep if joined => match token.kind {
                TokenKind::Dot => self.stage(SelectorStage::AfterDot),
                TokenKind::Hash => self.stage(SelectorStage::Hash),
                TokenKind::LBracket => {
                    self.stage = SelectorStage::AwaitFilter;
                    Ok(Step::Open(Frame::Selector(self), Frame::Block(BlockFrame::new(BlockKind::Filter))))
                }
                TokenKind::LParen => {
                    self.stage = SelectorStage::AwaitArgs;
                    Ok(Step::Open(Frame::Selector(self), Frame::Block(BlockFrame::new(BlockKind::Args))))
                }
                _ => self.finish(),
            },
            SelectorStage::AfterStep => self.finish(),
            SelectorStage::AwaitFilter | SelectorStage::AwaitArgs => Err(unexpected(token)),
        }
    }

    fn on_block(mut self, value: Value, mark: Mark) -> Result<Resume, Diagnostic> {
        match self.stage {
            SelectorStage::AwaitFilter => {
                self.steps.push(SelectorStep::Filter(value));
                self.stage = SelectorStage::AfterStep;
                Ok(Resume::Stay(Frame::Selector(self)))
            }
            SelectorStage::AwaitArgs => {
                let func: Value = self.selector().into();
                Ok(Resume::Pop(Outcome::Value(Value::expr(Expr::Invoke(func, value)))))
            }
            _ => Err(Diagnostic::new("malformed selector", mark)),
        }
    }
}
