use super::value::{Text, Value};

/// Expression nodes embedded in the structure tree.
///
/// Expressions are ordinary values: they parse from Recon, write back to
/// Recon, compare, and hash like any other node. They only mean something
/// once handed to an [`Interpreter`](super::Interpreter).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    Selector(Selector),
    Binary(BinaryOp, Value, Value),
    Unary(UnaryOp, Value),
    Conditional(Value, Value, Value),
    /// `bindings >> template`
    Lambda(Value, Value),
    /// `func(args)`
    Invoke(Value, Value),
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: impl Into<Value>, rhs: impl Into<Value>) -> Expr {
        Expr::Binary(op, lhs.into(), rhs.into())
    }

    pub fn unary(op: UnaryOp, operand: impl Into<Value>) -> Expr {
        Expr::Unary(op, operand.into())
    }

    pub fn conditional(
        cond: impl Into<Value>,
        then: impl Into<Value>,
        otherwise: impl Into<Value>,
    ) -> Expr {
        Expr::Conditional(cond.into(), then.into(), otherwise.into())
    }

    /// Binding strength when written infix; higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Lambda(..) => 1,
            Expr::Conditional(..) => 2,
            Expr::Binary(op, ..) => op.precedence(),
            Expr::Unary(..) => 12,
            Expr::Selector(_) | Expr::Invoke(..) => 13,
        }
    }
}

/// Path into the current scope, written with a leading `$`.
///
/// Each step carries the selector applied to its results; the chain ends in
/// `Identity`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Selector {
    Identity,
    Get(Value, Box<Selector>),
    GetAttr(Text, Box<Selector>),
    GetItem(usize, Box<Selector>),
    Keys(Box<Selector>),
    Values(Box<Selector>),
    Children(Box<Selector>),
    Descendants(Box<Selector>),
    Filter(Value, Box<Selector>),
}

impl Selector {
    pub fn get(key: impl Into<Value>) -> Selector {
        Selector::Get(key.into(), Box::new(Selector::Identity))
    }

    pub fn get_attr(key: impl Into<Text>) -> Selector {
        Selector::GetAttr(key.into(), Box::new(Selector::Identity))
    }

    pub fn get_item(index: usize) -> Selector {
        Selector::GetItem(index, Box::new(Selector::Identity))
    }

    pub fn then(&self) -> Option<&Selector> {
        match self {
            Selector::Identity => None,
            Selector::Get(_, then)
            | Selector::GetAttr(_, then)
            | Selector::GetItem(_, then)
            | Selector::Keys(then)
            | Selector::Values(then)
            | Selector::Children(then)
            | Selector::Descendants(then)
            | Selector::Filter(_, then) => Some(then),
        }
    }

    /// Appends `next` at the end of this chain.
    pub fn and_then(self, next: Selector) -> Selector {
        match self {
            Selector::Identity => next,
            step => step.map_then(|then| then.and_then(next)),
        }
    }

    fn map_then(self, f: impl FnOnce(Selector) -> Selector) -> Selector {
        let chain = |then: Box<Selector>| Box::new(f(*then));
        match self {
            Selector::Identity => Selector::Identity,
            Selector::Get(k, then) => Selector::Get(k, chain(then)),
            Selector::GetAttr(k, then) => Selector::GetAttr(k, chain(then)),
            Selector::GetItem(i, then) => Selector::GetItem(i, chain(then)),
            Selector::Keys(then) => Selector::Keys(chain(then)),
            Selector::Values(then) => Selector::Values(chain(then)),
            Selector::Children(then) => Selector::Children(chain(then)),
            Selector::Descendants(then) => Selector::Descendants(chain(then)),
            Selector::Filter(p, then) => Selector::Filter(p, chain(then)),
        }
    }
}

impl From<Selector> for Value {
    fn from(selector: Selector) -> Self {
        Value::expr(Expr::Selector(selector))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ge => ">=",
            BinaryOp::Gt => ">",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Times => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 3,
            BinaryOp::And => 4,
            BinaryOp::BitOr => 5,
            BinaryOp::BitXor => 6,
            BinaryOp::BitAnd => 7,
            BinaryOp::Eq | BinaryOp::Ne => 8,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Gt => 9,
            BinaryOp::Plus | BinaryOp::Minus => 10,
            BinaryOp::Times | BinaryOp::Divide | BinaryOp::Modulo => 11,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnaryOp {
    Not,
    BitNot,
    Negative,
    Positive,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Negative => "-",
            UnaryOp::Positive => "+",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_then_appends_to_chain_end() {
        let selector = Selector::get("a").and_then(Selector::get("b"));
        assert_eq!(
            selector,
            Selector::Get(Value::from("a"), Box::new(Selector::get("b")))
        );
        assert_eq!(selector.then(), Some(&Selector::get("b")));
    }

    #[test]
    fn test_precedence_orders_operators() {
        assert!(BinaryOp::Times.precedence() > BinaryOp::Plus.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
        assert!(Expr::conditional(true, 1, 2).precedence() < BinaryOp::Or.precedence());
    }
}
