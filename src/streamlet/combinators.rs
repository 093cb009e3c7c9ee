use std::collections::{BTreeMap, BTreeSet};

use super::graph::{Dataflow, Handle, Inputs, KeyEffect, Node, NodeId, Propagation};
use super::reduced_map::ReducedMap;
use super::source::{apply_key, entries_snapshot};
use crate::structure::{Item, Record, Value};

pub struct MapValue {
    f: Box<dyn FnMut(&Value) -> Value>,
}

impl MapValue {
    pub fn new(f: impl FnMut(&Value) -> Value + 'static) -> Self {
        MapValue { f: Box::new(f) }
    }
}

impl Node for MapValue {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let value = inputs.get(0);
        if value.is_defined() {
            (self.f)(&value)
        } else {
            Value::Absent
        }
    }
}

/// Passes its input through when the predicate holds, `Absent` otherwise.
pub struct FilterValue {
    predicate: Box<dyn FnMut(&Value) -> bool>,
}

impl FilterValue {
    pub fn new(predicate: impl FnMut(&Value) -> bool + 'static) -> Self {
        FilterValue { predicate: Box::new(predicate) }
    }
}

impl Node for FilterValue {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let value = inputs.get(0);
        if value.is_defined() && (self.predicate)(&value) {
            value
        } else {
            Value::Absent
        }
    }
}

pub struct WatchValue {
    f: Box<dyn FnMut(&Value)>,
}

impl WatchValue {
    pub fn new(f: impl FnMut(&Value) + 'static) -> Self {
        WatchValue { f: Box::new(f) }
    }
}

impl Node for WatchValue {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let value = inputs.get(0);
        (self.f)(&value);
        value
    }
}

/// Rebuilds a key-preserving map combinator from every key of its input.
fn rebuild<N: Node>(node: &mut N, map: fn(&mut N) -> &mut BTreeMap<Value, Value>, inputs: &mut Inputs<'_>) -> Value {
    map(node).clear();
    for key in inputs.keys(0) {
        node.evaluate_key(&key, inputs);
    }
    entries_snapshot(map(node))
}

/// Maps each field value of a map-shaped input, key by key.
pub struct MapFieldValues {
    f: Box<dyn FnMut(&Value, &Value) -> Value>,
    map: BTreeMap<Value, Value>,
}

impl MapFieldValues {
    pub fn new(f: impl FnMut(&Value, &Value) -> Value + 'static) -> Self {
        MapFieldValues { f: Box::new(f), map: BTreeMap::new() }
    }
}

impl Node for MapFieldValues {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        rebuild(self, |n| &mut n.map, inputs)
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, inputs: &mut Inputs<'_>) -> KeyEffect {
        let value = inputs.get_key(0, key);
        let mapped = if value.is_defined() { (self.f)(key, &value) } else { Value::Absent };
        apply_key(&mut self.map, key, mapped)
    }

    fn get_key(&self, key: &Value) -> Value {
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn keys(&self) -> Vec<Value> {
        self.map.keys().cloned().collect()
    }

    fn input_key_decohered(&mut self, _port: usize, key: &Value, effect: KeyEffect) -> Propagation {
        Propagation::Keys(vec![(key.clone(), effect)])
    }
}

/// Keeps the fields of a map-shaped input whose `(key, value)` satisfies a predicate.
pub struct FilterFields {
    predicate: Box<dyn FnMut(&Value, &Value) -> bool>,
    map: BTreeMap<Value, Value>,
}

impl FilterFields {
    pub fn new(predicate: impl FnMut(&Value, &Value) -> bool + 'static) -> Self {
        FilterFields { predicate: Box::new(predicate), map: BTreeMap::new() }
    }
}

impl Node for FilterFields {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        rebuild(self, |n| &mut n.map, inputs)
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, inputs: &mut Inputs<'_>) -> KeyEffect {
        let value = inputs.get_key(0, key);
        let kept = if value.is_defined() && (self.predicate)(key, &value) { value } else { Value::Absent };
        apply_key(&mut self.map, key, kept)
    }

    fn get_key(&self, key: &Value) -> Value {
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn keys(&self) -> Vec<Value> {
        self.map.keys().cloned().collect()
    }

    fn input_key_decohered(&mut self, _port: usize, key: &Value, effect: KeyEffect) -> Propagation {
        Propagation::Keys(vec![(key.clone(), effect)])
    }
}

/// Passes a map through, reporting each recomputed key (`None` when removed).
pub struct WatchFields {
    f: Box<dyn FnMut(&Value, Option<&Value>)>,
    map: BTreeMap<Value, Value>,
}

impl WatchFields {
    pub fn new(f: impl FnMut(&Value, Option<&Value>) + 'static) -> Self {
        WatchFields { f: Box::new(f), map: BTreeMap::new() }
    }
}

impl Node for WatchFields {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        rebuild(self, |n| &mut n.map, inputs)
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, inputs: &mut Inputs<'_>) -> KeyEffect {
        let value = inputs.get_key(0, key);
        (self.f)(key, Some(&value).filter(|v| v.is_defined()));
        apply_key(&mut self.map, key, value)
    }

    fn get_key(&self, key: &Value) -> Value {
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn keys(&self) -> Vec<Value> {
        self.map.keys().cloned().collect()
    }

    fn input_key_decohered(&mut self, _port: usize, key: &Value, effect: KeyEffect) -> Propagation {
        Propagation::Keys(vec![(key.clone(), effect)])
    }
}

type Fold = Box<dyn FnMut(&Value, &Value) -> Value>;

/// Folds the field values of a map-shaped input into one value.
///
/// Per-key values live in a [`ReducedMap`] that caches partial reductions,
/// so a keyed update only re-reduces the page holding that key. `accumulate`
/// folds one field value into a partial result; `combine` merges two
/// partial results and must be associative.
pub struct ReduceFields {
    identity: Value,
    accumulate: Fold,
    combine: Fold,
    state: ReducedMap,
    pending: BTreeSet<Value>,
    rebuild: bool,
}

impl ReduceFields {
    pub fn new(
        identity: impl Into<Value>,
        accumulate: impl FnMut(&Value, &Value) -> Value + 'static,
        combine: impl FnMut(&Value, &Value) -> Value + 'static,
    ) -> Self {
        ReduceFields {
            identity: identity.into(),
            accumulate: Box::new(accumulate),
            combine: Box::new(combine),
            state: ReducedMap::new(),
            pending: BTreeSet::new(),
            rebuild: true,
        }
    }

    pub fn state(&self) -> &ReducedMap {
        &self.state
    }
}

impl Node for ReduceFields {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let keys: Vec<Value> = if self.rebuild {
            self.rebuild = false;
            self.pending.clear();
            self.state.clear();
            inputs.keys(0)
        } else {
            std::mem::take(&mut self.pending).into_iter().collect()
        };
        for key in keys {
            let value = inputs.get_key(0, &key);
            if value.is_defined() {
                self.state.insert(key, value);
            } else {
                self.state.remove(&key);
            }
        }
        self.state.reduce(&self.identity, &mut self.accumulate, &mut self.combine)
    }

    fn input_decohered(&mut self, _port: usize) -> Propagation {
        self.rebuild = true;
        Propagation::Whole
    }

    fn input_key_decohered(&mut self, _port: usize, key: &Value, _effect: KeyEffect) -> Propagation {
        self.pending.insert(key.clone());
        Propagation::Whole
    }
}

/// Gathers named value inputs into one record, one slot per defined input.
#[derive(Clone, Debug, Default)]
pub struct JoinValues {
    keys: Vec<Value>,
}

impl JoinValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input port for `key`, if bound.
    pub fn port(&self, key: &Value) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

impl Node for JoinValues {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let mut record = Record::with_capacity(self.keys.len());
        for (port, key) in self.keys.iter().enumerate() {
            let value = inputs.get(port);
            if value.is_defined() {
                record.push(Item::slot(key.clone(), value));
            }
        }
        Value::Record(record)
    }
}

impl Handle<JoinValues> {
    /// Binds `source` under `key`, replacing any earlier source for it.
    pub fn bind(self, graph: &mut Dataflow, key: impl Into<Value>, source: impl Into<NodeId>) -> bool {
        let key = key.into();
        let port = match graph.node_mut(self) {
            Some(join) => match join.port(&key) {
                Some(port) => port,
                None => {
                    join.keys.push(key);
                    join.keys.len() - 1
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
    use crate::streamlet::{MapInput, MapOutput, ValueInput};
    use std::cell::Cell;
    use std::rc::Rc;

    fn sum(a: &Value, b: &Value) -> Value {
        match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Value::from(a + b),
            _ => Value::Absent,
        }
    }

    #[test]
    fn test_filter_fields_updates_per_key() {
        let mut graph = Dataflow::new();
        let checks = Rc::new(Cell::new(0));
        let input = graph.insert(MapInput::new());
        let filter = {
            let checks = checks.clone();
            graph.insert(FilterFields::new(move |_k: &Value, v: &Value| {
                checks.set(checks.get() + 1);
                v.as_i64().is_some_and(|n| n % 2 == 0)
            }))
        };
        let output = graph.insert(MapOutput::new());
        graph.bind_input(filter, 0, input);
        graph.bind_input(output, 0, filter);

        input.update(&mut graph, "two", 2);
        graph.recohere();
        assert_eq!(graph.get(output), Value::Record(Record::new().with_slot("two", 2)));
        let before = checks.get();

        input.update(&mut graph, "three", 4);
        assert_eq!(
            graph.recohere_output(output),
            Value::Record(Record::new().with_slot("three", 4).with_slot("two", 2))
        );
        assert_eq!(checks.get(), before + 1);

        input.update(&mut graph, "three", 3);
        graph.recohere();
        assert_eq!(graph.get(output), Value::Record(Record::new().with_slot("two", 2)));
    }

    #[test]
    fn test_reduce_fields_running_sum() {
        let mut graph = Dataflow::new();
        let input = graph.insert(MapInput::new());
        let total = graph.insert(ReduceFields::new(0, sum, sum));
        graph.bind_input(total, 0, input);

        input.update(&mut graph, "two", 2);
        graph.recohere();
        assert_eq!(graph.get(total), Value::from(2));

        input.update(&mut graph, "three", 3);
        graph.recohere();
        assert_eq!(graph.get(total), Value::from(5));

        input.remove(&mut graph, &Value::from("two"));
        assert_eq!(graph.get(total), Value::from(3));
    }

    #[test]
    fn test_map_field_values_and_watch() {
        let mut graph = Dataflow::new();
        let watched = Rc::new(Cell::new(0));
        let input = graph.insert(MapInput::new());
        let doubled = graph.insert(MapFieldValues::new(|_k: &Value, v: &Value| {
            v.as_i64().map_or(Value::Absent, |n| Value::from(n * 2))
        }));
        let watch = {
            let watched = watched.clone();
            graph.insert(WatchFields::new(move |_k: &Value, _v: Option<&Value>| watched.set(watched.get() + 1)))
        };
        graph.bind_input(doubled, 0, input);
        graph.bind_input(watch, 0, doubled);
        input.update(&mut graph, "a", 1);
        input.update(&mut graph, "b", 2);
        graph.recohere();
        assert_eq!(graph.get_key(watch, &Value::from("b")), Value::from(4));
        assert_eq!(watched.get(), 2);

        input.update(&mut graph, "a", 5);
        assert_eq!(graph.get_key(watch, &Value::from("a")), Value::from(10));
        assert_eq!(watched.get(), 3);
    }

    #[test]
    fn test_value_combinators() {
        let mut graph = Dataflow::new();
        let input = graph.insert(ValueInput::new(3));
        let even = graph.insert(FilterValue::new(|v: &Value| v.as_i64().is_some_and(|n| n % 2 == 0)));
        let squared = graph.insert(MapValue::new(|v: &Value| {
            v.as_i64().map_or(Value::Absent, |n| Value::from(n * n))
        }));
        graph.bind_input(even, 0, input);
        graph.bind_input(squared, 0, even);
        assert_eq!(graph.get(squared), Value::Absent);
        input.set(&mut graph, 4);
        assert_eq!(graph.get(squared), Value::from(16));
    }

    #[test]
    fn test_join_values() {
        let mut graph = Dataflow::new();
        let x = graph.insert(ValueInput::new(1));
        let y = graph.insert(ValueInput::new(Value::Absent));
        let join = graph.insert(JoinValues::new());
        assert!(join.bind(&mut graph, "x", x));
        assert!(join.bind(&mut graph, "y", y));
        assert_eq!(graph.get(join), Value::Record(Record::new().with_slot("x", 1)));
        y.set(&mut graph, "two");
        assert_eq!(
            graph.get(join),
            Value::Record(Record::new().with_slot("x", 1).with_slot("y", "two"))
        );
    }
}
