use base64::Engine;

use crate::codec::{Diagnostic, Input, Mark};
use crate::structure::BinaryOp;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    Newline,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Dollar,
    Hash,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    At(String),
    Ident(String),
    Str(String),
    Num(String),
    Data(Vec<u8>),
    Binary(BinaryOp),
    Not,
    Tilde,
    Question,
    Arrow,
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub mark: Mark,
    /// Whitespace separated this token from the previous one.
    pub spaced: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Prev {
    Other,
    Operand,
    Selectable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NumStage {
    Zero,
    Int,
    DotPending(Mark),
    Frac,
    Exp,
    ExpSign,
    ExpDigits,
    Hex,
}

#[derive(Clone, Debug)]
enum LexState {
    Start,
    Comment,
    Ident(String),
    Str { quote: char, text: String, attr: bool },
    Escape { quote: char, text: String, attr: bool },
    Unicode { quote: char, text: String, attr: bool, code: u32, digits: u8 },
    Num { text: String, stage: NumStage },
    Percent,
    Data(String),
    At,
    AtIdent(String),
    Pair(char),
    Done,
}

/// Character-level Recon tokenizer.
///
/// Holds only the token in flight, so it can stop at any character boundary
/// and resume with the next chunk.
#[derive(Clone, Debug)]
pub(crate) struct Lexer {
    state: LexState,
    token_mark: Mark,
    spaced: bool,
    prev: Prev,
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || (!c.is_ascii() && c.is_alphabetic())
}

pub(crate) fn is_ident_char(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '-' || (!c.is_ascii() && c.is_alphanumeric())
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='
}

impl Lexer {
    pub fn new() -> Self {
        Self { state: LexState::Start, token_mark: Mark::START, spaced: false, prev: Prev::Other }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, LexState::Done)
    }

    /// Tokenizes every character currently available in `input`.
    pub fn lex<I: Input>(&mut self, input: &mut I, out: &mut Vec<Token>) -> Result<(), Diagnostic> {
        loop {
            match input.head() {
                Some(c) => {
                    if self.is_done() {
                        return Err(Diagnostic::unexpected(Some(c), input.mark()));
                    }
                    if self.accept(Some(c), input.mark(), out)? {
                        input.step();
                    }
                }
                None if input.is_done() => {
                    while !self.is_done() {
                        self.accept(None, input.mark(), out)?;
                    }
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    fn emit(&mut self, kind: TokenKind, out: &mut Vec<Token>) {
        self.prev = match kind {
            TokenKind::Ident(_)
            | TokenKind::Str(_)
            | TokenKind::Num(_)
            | TokenKind::Data(_)
            | TokenKind::RBrace
            | TokenKind::RParen
            | TokenKind::RBracket => Prev::Operand,
            TokenKind::Dollar | TokenKind::Dot => Prev::Selectable,
            _ => Prev::Other,
        };
        out.push(Token { kind, mark: self.token_mark, spaced: self.spaced });
        self.spaced = false;
    }

    fn single(&mut self, kind: TokenKind, mark: Mark, out: &mut Vec<Token>) -> Result<bool, Diagnostic> {
        self.token_mark = mark;
        self.emit(kind, out);
        Ok(true)
    }

    /// Offers one character (or the end of input, as `None`) to the current
    /// state. Returns whether the character was consumed.
    fn accept(&mut self, c: Option<char>, mark: Mark, out: &mut Vec<Token>) -> Result<bool, Diagnostic> {
        let state = std::mem::replace(&mut self.state, LexState::Start);
        match state {
            LexState::Start => self.start(c, mark, out),
            LexState::Done => {
                self.state = LexState::Done;
                Ok(true)
            }
            LexState::Comment => match c {
                Some('\n') | None => Ok(false),
                Some(_) => {
                    self.state = LexState::Comment;
                    Ok(true)
                }
            },
            LexState::Ident(mut text) => match c {
                Some(c) if is_ident_char(c) => {
                    text.push(c);
                    self.state = LexState::Ident(text);
                    Ok(true)
                }
                _ => {
                    self.emit(TokenKind::Ident(text), out);
                    Ok(false)
                }
            },
            LexState::Str { quote, mut text, attr } => match c {
                Some(c) if c == quote => {
                    let kind = if attr { TokenKind::At(text) } else { TokenKind::Str(text) };
                    self.emit(kind, out);
                    Ok(true)
                }
                Some('\\') => {
                    self.state = LexState::Escape { quote, text, attr };
                    Ok(true)
                }
                Some(c) => {
                    text.push(c);
                    self.state = LexState::Str { quote, text, attr };
                    Ok(true)
                }
                None => Err(Diagnostic::expected(&format!("closing {}", quote), None, mark)),
            },
            LexState::Escape { quote, mut text, attr } => {
                let escaped = match c {
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('b') => '\u{8}',
                    Some('f') => '\u{c}',
                    Some('u') => {
                        self.state = LexState::Unicode { quote, text, attr, code: 0, digits: 0 };
                        return Ok(true);
                    }
                    Some(c @ ('"' | '\'' | '\\' | '/' | '@' | '{' | '}' | '[' | ']' | '#' | '$')) => c,
                    found => return Err(Diagnostic::expected("escape character", found, mark)),
                };
                text.push(escaped);
                self.state = LexState::Str { quote, text, attr };
                Ok(true)
            }
            LexState::Unicode { quote, mut text, attr, code, digits } => {
                let digit = c.and_then(|c| c.to_digit(16));
                let Some(digit) = digit else {
                    return Err(Diagnostic::expected("hex digit", c, mark));
                };
                let code = code * 16 + digit;
                if digits + 1 < 4 {
                    self.state = LexState::Unicode { quote, text, attr, code, digits: digits + 1 };
                } else {
                    let ch = char::from_u32(code)
                        .ok_or_else(|| Diagnostic::new("invalid unicode escape", mark))?;
                    text.push(ch);
                    self.state = LexState::Str { quote, text, attr };
                }
                Ok(true)
            }
            LexState::Num { text, stage } => self.number(text, stage, c, mark, out),
            LexState::Percent => match c {
                Some(c) if is_base64_char(c) => {
                    self.state = LexState::Data(String::new());
                    Ok(false)
                }
                None | Some(',' | ';' | ':' | ')' | '}' | ']') => {
                    self.emit(TokenKind::Data(Vec::new()), out);
                    Ok(false)
                }
                _ => {
                    self.emit(TokenKind::Binary(BinaryOp::Modulo), out);
                    Ok(false)
                }
            },
            LexState::Data(mut text) => match c {
                Some(c) if is_base64_char(c) => {
                    text.push(c);
                    self.state = LexState::Data(text);
                    Ok(true)
                }
                _ => {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(text.as_bytes())
                        .map_err(|e| Diagnostic::new(format!("invalid base64: {}", e), self.token_mark))?;
                    self.emit(TokenKind::Data(bytes), out);
                    Ok(false)
                }
            },
            LexState::At => match c {
                Some(q @ ('"' | '\'')) => {
                    self.state = LexState::Str { quote: q, text: String::new(), attr: true };
                    Ok(true)
                }
                Some(c) if is_ident_start(c) => {
                    self.state = LexState::AtIdent(c.to_string());
                    Ok(true)
                }
                found => Err(Diagnostic::expected("attribute name", found, mark)),
            },
            LexState::AtIdent(mut name) => match c {
                Some(c) if is_ident_char(c) => {
                    name.push(c);
                    self.state = LexState::AtIdent(name);
                    Ok(true)
                }
                _ => {
                    self.emit(TokenKind::At(name), out);
                    Ok(false)
                }
            },
            LexState::Pair(first) => self.pair(first, c, mark, out),
        }
    }

    fn start(&mut self, c: Option<char>, mark: Mark, out: &mut Vec<Token>) -> Result<bool, Diagnostic> {
        let Some(c) = c else {
            self.token_mark = mark;
            self.emit(TokenKind::End, out);
            self.state = LexState::Done;
            return Ok(true);
        };
        self.token_mark = mark;
        match c {
            ' ' | '\t' | '\r' => {
                self.spaced = true;
                Ok(true)
            }
            '\n' => self.single(TokenKind::Newline, mark, out),
            '#' if self.prev == Prev::Selectable && !self.spaced => {
                self.single(TokenKind::Hash, mark, out)
            }
            '#' => {
                self.state = LexState::Comment;
                Ok(true)
            }
            ',' => self.single(TokenKind::Comma, mark, out),
            ';' => self.single(TokenKind::Semicolon, mark, out),
            ':' => self.single(TokenKind::Colon, mark, out),
            '.' => self.single(TokenKind::Dot, mark, out),
            '$' => self.single(TokenKind::Dollar, mark, out),
            '{' => self.single(TokenKind::LBrace, mark, out),
            '}' => self.single(TokenKind::RBrace, mark, out),
            '(' => self.single(TokenKind::LParen, mark, out),
            ')' => self.single(TokenKind::RParen, mark, out),
            '[' => self.single(TokenKind::LBracket, mark, out),
            ']' => self.single(TokenKind::RBracket, mark, out),
            '+' => self.single(TokenKind::Binary(BinaryOp::Plus), mark, out),
            '-' => self.single(TokenKind::Binary(BinaryOp::Minus), mark, out),
            '*' => self.single(TokenKind::Binary(BinaryOp::Times), mark, out),
            '/' => self.single(TokenKind::Binary(BinaryOp::Divide), mark, out),
            '^' => self.single(TokenKind::Binary(BinaryOp::BitXor), mark, out),
            '~' => self.single(TokenKind::Tilde, mark, out),
            '?' => self.single(TokenKind::Question, mark, out),
            '%' if self.prev == Prev::Operand && !self.spaced => {
                self.single(TokenKind::Binary(BinaryOp::Modulo), mark, out)
            }
            '%' => {
                self.state = LexState::Percent;
                Ok(true)
            }
            '"' | '\'' => {
                self.state = LexState::Str { quote: c, text: String::new(), attr: false };
                Ok(true)
            }
            '@' => {
                self.state = LexState::At;
                Ok(true)
            }
            '<' | '>' | '=' | '!' | '&' | '|' => {
                self.state = LexState::Pair(c);
                Ok(true)
            }
            '0' => {
                self.state = LexState::Num { text: c.to_string(), stage: NumStage::Zero };
                Ok(true)
            }
            c if c.is_ascii_digit() => {
                self.state = LexState::Num { text: c.to_string(), stage: NumStage::Int };
                Ok(true)
            }
            c if is_ident_start(c) => {
                self.state = LexState::Ident(c.to_string());
                Ok(true)
            }
            c => Err(Diagnostic::unexpected(Some(c), mark)),
        }
    }

    fn pair(&mut self, first: char, c: Option<char>, mark: Mark, out: &mut Vec<Token>) -> Result<bool, Diagnostic> {
        let (kind, consumed) = match (first, c) {
            ('<', Some('=')) => (TokenKind::Binary(BinaryOp::Le), true),
            ('<', _) => (TokenKind::Binary(BinaryOp::Lt), false),
            ('>', Some('=')) => (TokenKind::Binary(BinaryOp::Ge), true),
            ('>', Some('>')) => (TokenKind::Arrow, true),
            ('>', _) => (TokenKind::Binary(BinaryOp::Gt), false),
            ('=', Some('=')) => (TokenKind::Binary(BinaryOp::Eq), true),
            ('=', found) => return Err(Diagnostic::expected("'='", found, mark)),
            ('!', Some('=')) => (TokenKind::Binary(BinaryOp::Ne), true),
            ('!', _) => (TokenKind::Not, false),
            ('&', Some('&')) => (TokenKind::Binary(BinaryOp::And), true),
            ('&', _) => (TokenKind::Binary(BinaryOp::BitAnd), false),
            ('|', Some('|')) => (TokenKind::Binary(BinaryOp::Or), true),
            _ => (TokenKind::Binary(BinaryOp::BitOr), false),
        };
        self.emit(kind, out);
        Ok(consumed)
    }

    fn number(
        &mut self,
        mut text: String,
        stage: NumStage,
        c: Option<char>,
        mark: Mark,
        out: &mut Vec<Token>,
    ) -> Result<bool, Diagnostic> {
        let digit = c.filter(char::is_ascii_digit);
        let next = match (stage, c) {
            (NumStage::Zero, Some('x' | 'X')) => Some(NumStage::Hex),
            (NumStage::Zero | NumStage::Int, Some(_)) if digit.is_some() => Some(NumStage::Int),
            (NumStage::Zero | NumStage::Int, Some('.')) => {
                self.state = LexState::Num { text, stage: NumStage::DotPending(mark) };
                return Ok(true);
            }
            (NumStage::Zero | NumStage::Int | NumStage::Frac, Some('e' | 'E')) => Some(NumStage::Exp),
            (NumStage::DotPending(_), Some(_)) if digit.is_some() => {
                text.push('.');
                Some(NumStage::Frac)
            }
            (NumStage::DotPending(dot), _) => {
                // A dot not followed by a digit belongs to whatever comes next.
                self.emit(TokenKind::Num(text), out);
                self.token_mark = dot;
                self.emit(TokenKind::Dot, out);
                return Ok(false);
            }
            (NumStage::Frac, Some(_)) if digit.is_some() => Some(NumStage::Frac),
            (NumStage::Exp, Some('+' | '-')) => Some(NumStage::ExpSign),
            (NumStage::Exp | NumStage::ExpSign | NumStage::ExpDigits, Some(_)) if digit.is_some() => {
                Some(NumStage::ExpDigits)
            }
            (NumStage::Exp | NumStage::ExpSign, found) => {
                return Err(Diagnostic::expected("exponent digit", found, mark));
            }
            (NumStage::Hex, Some(h)) if h.is_ascii_hexdigit() => Some(NumStage::Hex),
            (NumStage::Hex, found) if text.len() <= 2 => {
                return Err(Diagnostic::expected("hex digit", found, mark));
            }
            _ => None,
        };
        match (next, c) {
            (Some(stage), Some(c)) => {
                text.push(c);
                self.state = LexState::Num { text, stage };
                Ok(true)
            }
            _ => {
                self.emit(TokenKind::Num(text), out);
                Ok(false)
            }
        }
    }
}
