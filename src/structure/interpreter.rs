use super::expr::{BinaryOp, Expr, Selector, UnaryOp};
use super::item::{Field, Item};
use super::num::Num;
use super::record::Record;
use super::value::Value;

/// Evaluates expressions against a stack of scopes.
///
/// Selectors look up the innermost scope first and fall back outward.
/// Evaluation is total: anything that cannot be computed yields `Absent`.
#[derive(Clone, Debug, Default)]
pub struct Interpreter {
    scopes: Vec<Value>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn with_scope(scope: impl Into<Value>) -> Self {
        Self { scopes: vec![scope.into()] }
    }

    pub fn push_scope(&mut self, scope: impl Into<Value>) {
        self.scopes.push(scope.into());
    }

    pub fn pop_scope(&mut self) -> Option<Value> {
        self.scopes.pop()
    }

    pub fn peek_scope(&self) -> Option<&Value> {
        self.scopes.last()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn evaluate(&mut self, value: &Value) -> Value {
        match value {
            Value::Expr(expr) => self.evaluate_expr(expr),
            Value::Record(record) if needs_evaluation(record) => {
                Value::Record(record.iter().map(|item| self.evaluate_item(item)).collect())
            }
            other => other.clone(),
        }
    }

    fn evaluate_item(&mut self, item: &Item) -> Item {
        match item {
            Item::Field(Field::Attr(k, v)) => Item::Field(Field::Attr(k.clone(), self.evaluate(v))),
            Item::Field(Field::Slot(k, v)) => {
                Item::Field(Field::Slot(self.evaluate(k), self.evaluate(v)))
            }
            Item::Value(v) => Item::Value(self.evaluate(v)),
        }
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Selector(selector) => self.select(selector),
            Expr::Binary(op, lhs, rhs) => self.evaluate_binary(*op, lhs, rhs),
            Expr::Unary(op, operand) => {
                let operand = self.evaluate(operand);
                unary(*op, &operand)
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.evaluate(cond).is_truthy() {
                    self.evaluate(then)
                } else {
                    self.evaluate(otherwise)
                }
            }
            Expr::Lambda(..) => Value::expr(expr.clone()),
            Expr::Invoke(func, args) => self.invoke(func, args),
        }
    }

    fn evaluate_binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
        let lhs = self.evaluate(lhs);
        match op {
            BinaryOp::Or if lhs.is_truthy() => lhs,
            BinaryOp::Or => self.evaluate(rhs),
            BinaryOp::And if lhs.is_truthy() => self.evaluate(rhs),
            BinaryOp::And => lhs,
            op => {
                let rhs = self.evaluate(rhs);
                binary(op, &lhs, &rhs)
            }
        }
    }

    fn invoke(&mut self, func: &Value, args: &Value) -> Value {
        let func = self.evaluate(func);
        let args = self.evaluate(args);
        match func.as_expr() {
            Some(Expr::Lambda(bindings, template)) => {
                let mut scope = Record::new();
                let args: Vec<Value> = match &args {
                    Value::Record(r) => r.iter().map(Item::to_value).collect(),
                    Value::Absent => Vec::new(),
                    other => vec![other.clone()],
                };
                let names: Vec<&Value> = match bindings {
                    Value::Record(r) => r.iter().filter_map(Item::as_value).collect(),
                    other => vec![other],
                };
                for (index, name) in names.into_iter().enumerate() {
                    let arg = args.get(index).cloned().unwrap_or(Value::Absent);
                    scope.push(Item::slot(name.clone(), arg));
                }
                self.push_scope(scope);
                let result = self.evaluate(template);
                self.pop_scope();
                result
            }
            _ => Value::Absent,
        }
    }

    /// Evaluates a selector against the scope stack, innermost first.
    pub fn select(&mut self, selector: &Selector) -> Value {
        let scopes: Vec<Value> = self.scopes.iter().rev().cloned().collect();
        for scope in scopes {
            let mut results = Vec::new();
            self.select_from(selector, &scope, &mut results);
            if !results.is_empty() {
                return collect(results);
            }
            if matches!(selector, Selector::Identity) {
                break;
            }
        }
        Value::Absent
    }

    /// Applies `selector` to `value`, appending every match to `results`.
    pub fn select_from(&mut self, selector: &Selector, value: &Value, results: &mut Vec<Value>) {
        match selector {
            Selector::Identity => {
                if value.is_defined() {
                    results.push(value.clone());
                }
            }
            Selector::Get(key, then) => {
                let key = self.evaluate(key);
                let found = value.get(&key);
                if found.is_defined() {
                    let found = found.clone();
                    self.select_from(then, &found, results);
                }
            }
            Selector::GetAttr(key, then) => {
                let found = value.get_attr(key);
                if found.is_defined() {
                    let found = found.clone();
                    self.select_from(then, &found, results);
                }
            }
            Selector::GetItem(index, then) => {
                if let Some(item) = value.as_record().and_then(|r| r.item(*index)) {
                    let found = item.clone().into_value();
                    self.select_from(then, &found, results);
                }
            }
            Selector::Keys(then) => {
                if let Some(record) = value.as_record() {
                    for key in record.keys() {
                        self.select_from(then, &key, results);
                    }
                }
            }
            Selector::Values(then) => {
                if let Some(record) = value.as_record() {
                    for item in record.iter() {
                        if let Item::Field(f) = item {
                            let v = f.value().clone();
                            self.select_from(then, &v, results);
                        }
                    }
                }
            }
            Selector::Children(then) => {
                if let Some(record) = value.as_record() {
                    for item in record.iter() {
                        let child = item.clone().into_value();
                        self.select_from(then, &child, results);
                    }
                }
            }
            Selector::Descendants(then) => {
                if let Some(record) = value.as_record() {
                    for item in record.iter() {
                        let child = item.clone().into_value();
                        self.select_from(then, &child, results);
                        self.select_from(selector, &item.to_value(), results);
                    }
                }
            }
            Selector::Filter(predicate, then) => {
                self.push_scope(value.clone());
                let keep = self.evaluate(predicate).is_truthy();
                self.pop_scope();
                if keep {
                    self.select_from(then, value, results);
                }
            }
        }
    }
}

fn needs_evaluation(record: &Record) -> bool {
    record.iter().any(|item| match item {
        Item::Field(Field::Attr(_, v)) | Item::Value(v) => needs_value_evaluation(v),
        Item::Field(Field::Slot(k, v)) => needs_value_evaluation(k) || needs_value_evaluation(v),
    })
}

fn needs_value_evaluation(value: &Value) -> bool {
    match value {
        Value::Expr(_) => true,
        Value::Record(r) => needs_evaluation(r),
        _ => false,
    }
}

fn collect(mut results: Vec<Value>) -> Value {
    if results.len() == 1 {
        results.pop().unwrap_or_default()
    } else {
        Value::Record(results.into_iter().map(Item::Value).collect())
    }
}

/// Applies a non-short-circuiting binary operator to evaluated operands.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Or => {
            if lhs.is_truthy() {
                lhs.clone()
            } else {
                rhs.clone()
            }
        }
        BinaryOp::And => {
            if lhs.is_truthy() {
                rhs.clone()
            } else {
                lhs.clone()
            }
        }
        BinaryOp::Eq => Value::Bool(lhs == rhs),
        BinaryOp::Ne => Value::Bool(lhs != rhs),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Gt => {
            // Ordering across kinds is total but meaningless to a predicate.
            if lhs.is_absent() || lhs.kind_order() != rhs.kind_order() {
                return Value::Absent;
            }
            let ord = lhs.cmp(rhs);
            Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Ge => ord.is_ge(),
                _ => ord.is_gt(),
            })
        }
        BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd => match (lhs, rhs) {
            (Value::Bool(a), Value::Bool(b)) => Value::Bool(match op {
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                _ => a & b,
            }),
            _ => match (lhs.as_i64(), rhs.as_i64()) {
                (Some(a), Some(b)) => Value::Num(Num::Int(match op {
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    _ => a & b,
                })),
                _ => Value::Absent,
            },
        },
        BinaryOp::Plus => match (lhs, rhs) {
            (Value::Num(a), Value::Num(b)) => Value::Num(a.add(*b)),
            (Value::Text(a), Value::Text(b)) => Value::from(format!("{}{}", a, b)),
            _ => Value::Absent,
        },
        BinaryOp::Minus | BinaryOp::Times | BinaryOp::Divide | BinaryOp::Modulo => {
            match (lhs, rhs) {
                (Value::Num(a), Value::Num(b)) => Value::Num(match op {
                    BinaryOp::Minus => a.sub(*b),
                    BinaryOp::Times => a.mul(*b),
                    BinaryOp::Divide => a.div(*b),
                    _ => a.rem(*b),
                }),
                _ => Value::Absent,
            }
        }
    }
}

/// Applies a unary operator to an evaluated operand.
pub fn unary(op: UnaryOp, operand: &Value) -> Value {
    match op {
        UnaryOp::Not => match operand {
            Value::Absent => Value::Absent,
            other => Value::Bool(!other.is_truthy()),
        },
        UnaryOp::BitNot => operand
            .as_i64()
            .map(|i| Value::Num(Num::Int(!i)))
            .unwrap_or(Value::Absent),
        UnaryOp::Negative => operand.as_num().map(|n| Value::Num(n.neg())).unwrap_or(Value::Absent),
        UnaryOp::Positive => match operand {
            Value::Num(_) => operand.clone(),
            _ => Value::Absent,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Value {
        Value::Record(
            Record::new()
                .with_attr("tag", "t")
                .with_slot("a", 2)
                .with_slot("b", 3)
                .with_slot("nested", Record::new().with_slot("c", "deep")),
        )
    }

    #[test]
    fn test_arithmetic_over_selectors() {
        let mut interpreter = Interpreter::with_scope(scope());
        let expr = Value::expr(Expr::binary(
            BinaryOp::Plus,
            Selector::get("a"),
            Expr::binary(BinaryOp::Times, Selector::get("b"), 10),
        ));
        assert_eq!(interpreter.evaluate(&expr), Value::from(32));
    }

    #[test]
    fn test_missing_key_is_absent() {
        let mut interpreter = Interpreter::with_scope(scope());
        let expr = Value::expr(Expr::binary(BinaryOp::Plus, Selector::get("zzz"), 1));
        assert_eq!(interpreter.evaluate(&expr), Value::Absent);
    }

    #[test]
    fn test_selector_chains_and_attrs() {
        let mut interpreter = Interpreter::with_scope(scope());
        let deep = Selector::get("nested").and_then(Selector::get("c"));
        assert_eq!(interpreter.select(&deep), Value::from("deep"));
        assert_eq!(interpreter.select(&Selector::get_attr("tag")), Value::from("t"));
        assert_eq!(interpreter.select(&Selector::get_item(1)), Value::Record(Record::new().with_slot("a", 2)));
    }

    #[test]
    fn test_keys_and_filter() {
        let mut interpreter = Interpreter::with_scope(scope());
        let keys = interpreter.select(&Selector::Keys(Box::new(Selector::Identity)));
        assert_eq!(keys.as_record().map(Record::len), Some(4));

        let filter = Selector::Values(Box::new(Selector::Filter(
            Value::expr(Expr::binary(BinaryOp::Gt, Selector::Identity, 2)),
            Box::new(Selector::Identity),
        )));
        assert_eq!(interpreter.select(&filter), Value::from(3));
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut interpreter = Interpreter::with_scope(scope());
        interpreter.push_scope(Record::new().with_slot("a", 100));
        assert_eq!(interpreter.select(&Selector::get("a")), Value::from(100));
        assert_eq!(interpreter.select(&Selector::get("b")), Value::from(3));
    }

    #[test]
    fn test_lambda_invoke() {
        let mut interpreter = Interpreter::with_scope(
            Record::new().with_slot(
                "inc",
                Expr::Lambda(Value::from("x"), Value::expr(Expr::binary(BinaryOp::Plus, Selector::get("x"), 1))),
            ),
        );
        let call = Value::expr(Expr::Invoke(Selector::get("inc").into(), Value::from(41)));
        assert_eq!(interpreter.evaluate(&call), Value::from(42));
    }

    #[test]
    fn test_conditional_and_logic() {
        let mut interpreter = Interpreter::new();
        let cond = Value::expr(Expr::conditional(
            Expr::binary(BinaryOp::And, true, Expr::unary(UnaryOp::Not, false)),
            "yes",
            "no",
        ));
        assert_eq!(interpreter.evaluate(&cond), Value::from("yes"));
        assert_eq!(binary(BinaryOp::Or, &Value::Absent, &Value::from(7)), Value::from(7));
    }
}
