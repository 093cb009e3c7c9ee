use super::graph::{Inputs, Node};
use crate::structure::{binary, unary, BinaryOp, Interpreter, UnaryOp, Value};

/// `lhs op rhs` over ports 0 and 1.
#[derive(Copy, Clone, Debug)]
pub struct BinaryOutlet {
    op: BinaryOp,
}

impl BinaryOutlet {
    pub const LHS: usize = 0;
    pub const RHS: usize = 1;

    pub fn new(op: BinaryOp) -> Self {
        BinaryOutlet { op }
    }
}

impl Node for BinaryOutlet {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let lhs = inputs.get(Self::LHS);
        let rhs = inputs.get(Self::RHS);
        binary(self.op, &lhs, &rhs)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct UnaryOutlet {
    op: UnaryOp,
}

impl UnaryOutlet {
    pub fn new(op: UnaryOp) -> Self {
        UnaryOutlet { op }
    }
}

impl Node for UnaryOutlet {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        unary(self.op, &inputs.get(0))
    }
}

/// `if ? then : else`; only the chosen branch is read.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConditionalOutlet;

impl ConditionalOutlet {
    pub const IF: usize = 0;
    pub const THEN: usize = 1;
    pub const ELSE: usize = 2;
}

impl Node for ConditionalOutlet {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        if inputs.get(Self::IF).is_truthy() {
            inputs.get(Self::THEN)
        } else {
            inputs.get(Self::ELSE)
        }
    }
}

/// Evaluates an expression with its input as the scope.
#[derive(Clone, Debug)]
pub struct ExpressionOutlet {
    expr: Value,
}

impl ExpressionOutlet {
    pub fn new(expr: impl Into<Value>) -> Self {
        ExpressionOutlet { expr: expr.into() }
    }
}

impl Node for ExpressionOutlet {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        Interpreter::with_scope(inputs.get(0)).evaluate(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon;
    use crate::streamlet::{Dataflow, MapInput, ValueInput};

    #[test]
    fn test_binary_and_unary() {
        let mut graph = Dataflow::new();
        let a = graph.insert(ValueInput::new(2));
        let b = graph.insert(ValueInput::new(5));
        let plus = graph.insert(BinaryOutlet::new(BinaryOp::Plus));
        let negate = graph.insert(UnaryOutlet::new(UnaryOp::Negative));
        graph.bind_input(plus, BinaryOutlet::LHS, a);
        graph.bind_input(plus, BinaryOutlet::RHS, b);
        graph.bind_input(negate, 0, plus);
        assert_eq!(graph.get(negate), Value::from(-7));
        b.set(&mut graph, 1);
        assert_eq!(graph.get(negate), Value::from(-3));
    }

    #[test]
    fn test_missing_operand_is_absent() {
        let mut graph = Dataflow::new();
        let a = graph.insert(ValueInput::new(2));
        let times = graph.insert(BinaryOutlet::new(BinaryOp::Times));
        graph.bind_input(times, BinaryOutlet::LHS, a);
        assert_eq!(graph.get(times), Value::Absent);
    }

    #[test]
    fn test_conditional() {
        let mut graph = Dataflow::new();
        let cond = graph.insert(ValueInput::new(true));
        let yes = graph.insert(ValueInput::new("yes"));
        let no = graph.insert(ValueInput::new("no"));
        let pick = graph.insert(ConditionalOutlet);
        graph.bind_input(pick, ConditionalOutlet::IF, cond);
        graph.bind_input(pick, ConditionalOutlet::THEN, yes);
        graph.bind_input(pick, ConditionalOutlet::ELSE, no);
        assert_eq!(graph.get(pick), Value::from("yes"));
        cond.set(&mut graph, false);
        assert_eq!(graph.get(pick), Value::from("no"));
    }

    #[test]
    fn test_expression_over_map_scope() {
        let mut graph = Dataflow::new();
        let state = graph.insert(MapInput::new());
        let expr = recon::parse("$brightness * 100").unwrap();
        let percent = graph.insert(ExpressionOutlet::new(expr));
        graph.bind_input(percent, 0, state);
        state.update(&mut graph, "brightness", 0.5);
        assert_eq!(graph.get(percent), Value::from(50.0));
    }
}
