use super::graph::{Dataflow, Handle, Inputs, KeyEffect, Node, NodeId, Propagation};
use crate::structure::{Record, Value};

/// Mutable record exposed as a map-shaped node.
///
/// Fields are either set directly or bound to an outlet, in which case the
/// field follows that outlet's value. The record is owned by the graph and
/// reached only through its handle.
#[derive(Clone, Debug, Default)]
pub struct RecordModel {
    record: Record,
    bindings: Vec<Value>,
}

impl RecordModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: Record) -> Self {
        RecordModel { record, bindings: Vec::new() }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    fn port(&self, key: &Value) -> Option<usize> {
        self.bindings.iter().position(|k| k == key)
    }
}

impl Node for RecordModel {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        for key in self.bindings.clone() {
            self.evaluate_key(&key, inputs);
        }
        Value::Record(self.record.clone())
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, inputs: &mut Inputs<'_>) -> KeyEffect {
        if let Some(port) = self.port(key) {
            let value = inputs.get(port);
            if value.is_defined() {
                self.record.set(key.clone(), value);
            } else {
                self.record.remove_key(key);
            }
        }
        if self.record.contains_key(key) {
            KeyEffect::Update
        } else {
            KeyEffect::Remove
        }
    }

    fn get_key(&self, key: &Value) -> Value {
        self.record.get(key).clone()
    }

    fn keys(&self) -> Vec<Value> {
        self.record.keys().collect()
    }

    fn snapshot(&self) -> Value {
        Value::Record(self.record.clone())
    }

    fn input_decohered(&mut self, port: usize) -> Propagation {
        match self.bindings.get(port) {
            Some(key) => Propagation::Keys(vec![(key.clone(), KeyEffect::Update)]),
            None => Propagation::Ignore,
        }
    }
}

impl Handle<RecordModel> {
    pub fn set(self, graph: &mut Dataflow, key: impl Into<Value>, value: impl Into<Value>) -> Value {
        let key = key.into();
        let old = match graph.node_mut(self) {
            Some(model) => model.record.set(key.clone(), value),
            None => return Value::Absent,
        };
        graph.decohere_key(self, key, KeyEffect::Update);
        old
    }

    pub fn remove(self, graph: &mut Dataflow, key: &Value) -> Value {
        let old = match graph.node_mut(self) {
            Some(model) => model.record.remove_key(key),
            None => return Value::Absent,
        };
        graph.decohere_key(self, key.clone(), KeyEffect::Remove);
        old
    }

    /// Makes field `key` follow `source`.
    pub fn bind(self, graph: &mut Dataflow, key: impl Into<Value>, source: impl Into<NodeId>) -> bool {
        let key = key.into();
        let port = match graph.node_mut(self) {
            Some(model) => match model.port(&key) {
                Some(port) => port,
                None => {
                    model.bindings.push(key);
                    model.bindings.len() - 1
                }
            },
            None => return false,
        };
        graph.bind_input(self, port, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamlet::{KeyOutlet, ValueInput};

    #[test]
    fn test_set_and_remove_fields() {
        let mut graph = Dataflow::new();
        let model = graph.insert(RecordModel::with_record(Record::new().with_slot("a", 1)));
        let b = graph.insert(KeyOutlet::new("b"));
        graph.bind_input(b, 0, model);
        assert_eq!(graph.get(b), Value::Absent);

        model.set(&mut graph, "b", 2);
        assert_eq!(graph.get(b), Value::from(2));
        assert_eq!(
            graph.get(model),
            Value::Record(Record::new().with_slot("a", 1).with_slot("b", 2))
        );
        assert_eq!(model.remove(&mut graph, &Value::from("a")), Value::from(1));
        assert_eq!(graph.keys(model), vec![Value::from("b")]);
    }

    #[test]
    fn test_bound_field_follows_source() {
        let mut graph = Dataflow::new();
        let model = graph.insert(RecordModel::new());
        let level = graph.insert(ValueInput::new(3));
        let watch = graph.insert(KeyOutlet::new("level"));
        assert!(model.bind(&mut graph, "level", level));
        graph.bind_input(watch, 0, model);
        assert_eq!(graph.get(watch), Value::from(3));

        level.set(&mut graph, 4);
        assert!(!graph.is_coherent(watch));
        assert_eq!(graph.get_key(model, &Value::from("level")), Value::from(4));
        assert_eq!(graph.get(watch), Value::from(4));
    }
}
