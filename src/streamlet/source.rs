use std::collections::BTreeMap;

use super::graph::{Dataflow, Handle, Inputs, KeyEffect, Node, Propagation};
use crate::structure::{Item, Record, Value};

/// Settable value at the root of a graph.
#[derive(Clone, Debug, Default)]
pub struct ValueInput {
    value: Value,
}

impl ValueInput {
    pub fn new(value: impl Into<Value>) -> Self {
        ValueInput { value: value.into() }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Node for ValueInput {
    fn evaluate(&mut self, _inputs: &mut Inputs<'_>) -> Value {
        self.value.clone()
    }
}

impl Handle<ValueInput> {
    /// Replaces the value and decoheres dependents. Returns the old value.
    pub fn set(self, graph: &mut Dataflow, value: impl Into<Value>) -> Value {
        let old = match graph.node_mut(self) {
            Some(input) => std::mem::replace(&mut input.value, value.into()),
            None => return Value::Absent,
        };
        graph.decohere(self);
        old
    }
}

type ValueObserver = Box<dyn FnMut(&Value)>;

/// Sink that remembers the last value it was recohered with.
#[derive(Default)]
pub struct ValueOutput {
    value: Value,
    observer: Option<ValueObserver>,
}

impl ValueOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `observer` with every recomputed value.
    pub fn observed(observer: impl FnMut(&Value) + 'static) -> Self {
        ValueOutput { value: Value::Absent, observer: Some(Box::new(observer)) }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Node for ValueOutput {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let value = inputs.get(0);
        if let Some(observer) = self.observer.as_mut() {
            observer(&value);
        }
        self.value = value.clone();
        value
    }
}

/// Holds on to its input so downstream reads never reach further up.
#[derive(Clone, Debug, Default)]
pub struct Memoize {
    value: Value,
}

impl Memoize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Node for Memoize {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        self.value = inputs.get(0);
        self.value.clone()
    }
}

pub(crate) fn entries_snapshot(map: &BTreeMap<Value, Value>) -> Value {
    Value::Record(map.iter().map(|(k, v)| Item::slot(k.clone(), v.clone())).collect::<Record>())
}

/// Stores `value` under `key`, or drops the key when `value` is absent.
pub(crate) fn apply_key(map: &mut BTreeMap<Value, Value>, key: &Value, value: Value) -> KeyEffect {
    if value.is_defined() {
        map.insert(key.clone(), value);
        KeyEffect::Update
    } else {
        map.remove(key);
        KeyEffect::Remove
    }
}

/// Settable key-ordered map at the root of a graph.
#[derive(Clone, Debug, Default)]
pub struct MapInput {
    map: BTreeMap<Value, Value>,
}

impl MapInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.iter()
    }
}

impl FromIterator<(Value, Value)> for MapInput {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        MapInput { map: iter.into_iter().collect() }
    }
}

impl Node for MapInput {
    fn evaluate(&mut self, _inputs: &mut Inputs<'_>) -> Value {
        entries_snapshot(&self.map)
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, _inputs: &mut Inputs<'_>) -> KeyEffect {
        if self.map.contains_key(key) {
            KeyEffect::Update
        } else {
            KeyEffect::Remove
        }
    }

    fn get_key(&self, key: &Value) -> Value {
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn keys(&self) -> Vec<Value> {
        self.map.keys().cloned().collect()
    }

    fn snapshot(&self) -> Value {
        entries_snapshot(&self.map)
    }
}

impl Handle<MapInput> {
    pub fn update(self, graph: &mut Dataflow, key: impl Into<Value>, value: impl Into<Value>) -> Value {
        let key = key.into();
        let old = match graph.node_mut(self) {
            Some(input) => input.map.insert(key.clone(), value.into()).unwrap_or_default(),
            None => return Value::Absent,
        };
        graph.decohere_key(self, key, KeyEffect::Update);
        old
    }

    pub fn remove(self, graph: &mut Dataflow, key: &Value) -> Value {
        match graph.node_mut(self).and_then(|input| input.map.remove(key)) {
            Some(old) => {
                graph.decohere_key(self, key.clone(), KeyEffect::Remove);
                old
            }
            None => Value::Absent,
        }
    }

    pub fn clear(self, graph: &mut Dataflow) {
        let removed = match graph.node_mut(self) {
            Some(input) => std::mem::take(&mut input.map),
            None => return,
        };
        for key in removed.into_keys() {
            graph.decohere_key(self, key, KeyEffect::Remove);
        }
    }

    /// Makes the map equal to `entries`, decohering only keys that changed.
    pub fn replace(self, graph: &mut Dataflow, entries: BTreeMap<Value, Value>) {
        let mut changes = Vec::new();
        match graph.node_mut(self) {
            Some(input) => {
                for key in input.map.keys() {
                    if !entries.contains_key(key) {
                        changes.push((key.clone(), KeyEffect::Remove));
                    }
                }
                for (key, value) in &entries {
                    if input.map.get(key) != Some(value) {
                        changes.push((key.clone(), KeyEffect::Update));
                    }
                }
                input.map = entries;
            }
            None => return,
        }
        for (key, effect) in changes {
            graph.decohere_key(self, key, effect);
        }
    }
}

fn index_key(index: usize) -> Value {
    Value::from(index as u64)
}

/// Settable sequence at the root of a graph, keyed by item index.
///
/// Its whole value is a record of positional items. Edits decohere only the
/// indices whose item changed, so an update in place touches one key and an
/// insert or removal touches the shifted tail.
#[derive(Clone, Debug, Default)]
pub struct ListInput {
    items: Vec<Value>,
}

impl ListInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    fn index(key: &Value) -> Option<usize> {
        key.as_i64().and_then(|i| usize::try_from(i).ok())
    }
}

impl FromIterator<Value> for ListInput {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ListInput { items: iter.into_iter().collect() }
    }
}

impl Node for ListInput {
    fn evaluate(&mut self, _inputs: &mut Inputs<'_>) -> Value {
        self.snapshot()
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, _inputs: &mut Inputs<'_>) -> KeyEffect {
        match Self::index(key) {
            Some(index) if index < self.items.len() => KeyEffect::Update,
            _ => KeyEffect::Remove,
        }
    }

    fn get_key(&self, key: &Value) -> Value {
        Self::index(key)
            .and_then(|index| self.items.get(index))
            .cloned()
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<Value> {
        (0..self.items.len()).map(index_key).collect()
    }

    fn snapshot(&self) -> Value {
        Value::Record(self.items.iter().cloned().map(Item::Value).collect::<Record>())
    }
}

impl Handle<ListInput> {
    /// Replaces the item at `index`; out of range is a no-op returning `Absent`.
    pub fn set(self, graph: &mut Dataflow, index: usize, value: impl Into<Value>) -> Value {
        let old = match graph.node_mut(self).and_then(|input| input.items.get_mut(index)) {
            Some(item) => std::mem::replace(item, value.into()),
            None => return Value::Absent,
        };
        graph.decohere_key(self, index_key(index), KeyEffect::Update);
        old
    }

    /// Inserts at `index`, which may equal the length. Returns false when out of range.
    pub fn insert(self, graph: &mut Dataflow, index: usize, value: impl Into<Value>) -> bool {
        let len = match graph.node_mut(self) {
            Some(input) if index <= input.items.len() => {
                input.items.insert(index, value.into());
                input.items.len()
            }
            _ => return false,
        };
        for shifted in index..len {
            graph.decohere_key(self, index_key(shifted), KeyEffect::Update);
        }
        true
    }

    pub fn remove(self, graph: &mut Dataflow, index: usize) -> Value {
        let (old, len) = match graph.node_mut(self) {
            Some(input) if index < input.items.len() => (input.items.remove(index), input.items.len()),
            _ => return Value::Absent,
        };
        for shifted in index..len {
            graph.decohere_key(self, index_key(shifted), KeyEffect::Update);
        }
        graph.decohere_key(self, index_key(len), KeyEffect::Remove);
        old
    }

    /// Makes the list equal to `items`, decohering only indices that changed.
    pub fn replace(self, graph: &mut Dataflow, items: Vec<Value>) {
        let mut changes = Vec::new();
        match graph.node_mut(self) {
            Some(input) => {
                for (index, item) in items.iter().enumerate() {
                    if input.items.get(index) != Some(item) {
                        changes.push((index, KeyEffect::Update));
                    }
                }
                changes.extend((items.len()..input.items.len()).map(|index| (index, KeyEffect::Remove)));
                input.items = items;
            }
            None => return,
        }
        for (index, effect) in changes {
            graph.decohere_key(self, index_key(index), effect);
        }
    }
}

type EntryObserver = Box<dyn FnMut(&Value, Option<&Value>)>;

/// Map-shaped sink; the observer sees each changed key, with `None` for removals.
#[derive(Default)]
pub struct MapOutput {
    map: BTreeMap<Value, Value>,
    observer: Option<EntryObserver>,
}

impl MapOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(observer: impl FnMut(&Value, Option<&Value>) + 'static) -> Self {
        MapOutput { map: BTreeMap::new(), observer: Some(Box::new(observer)) }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn notify(&mut self, key: &Value, value: Option<&Value>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(key, value);
        }
    }
}

impl Node for MapOutput {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        let mut fresh = BTreeMap::new();
        for key in inputs.keys(0) {
            let value = inputs.get_key(0, &key);
            if value.is_defined() {
                fresh.insert(key, value);
            }
        }
        let old = std::mem::take(&mut self.map);
        for key in old.keys() {
            if !fresh.contains_key(key) {
                self.notify(key, None);
            }
        }
        for (key, value) in &fresh {
            if old.get(key) != Some(value) {
                self.notify(key, Some(value));
            }
        }
        self.map = fresh;
        entries_snapshot(&self.map)
    }

    fn is_map(&self) -> bool {
        true
    }

    fn evaluate_key(&mut self, key: &Value, inputs: &mut Inputs<'_>) -> KeyEffect {
        let value = inputs.get_key(0, key);
        if value.is_defined() {
            if self.map.get(key) != Some(&value) {
                self.notify(key, Some(&value));
            }
        } else if self.map.contains_key(key) {
            self.notify(key, None);
        }
        apply_key(&mut self.map, key, value)
    }

    fn get_key(&self, key: &Value) -> Value {
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn keys(&self) -> Vec<Value> {
        self.map.keys().cloned().collect()
    }

    fn snapshot(&self) -> Value {
        entries_snapshot(&self.map)
    }

    fn input_key_decohered(&mut self, _port: usize, key: &Value, effect: KeyEffect) -> Propagation {
        Propagation::Keys(vec![(key.clone(), effect)])
    }
}

/// Projects one key of a map-shaped input; other keys never decohere it.
#[derive(Clone, Debug)]
pub struct KeyOutlet {
    key: Value,
}

impl KeyOutlet {
    pub fn new(key: impl Into<Value>) -> Self {
        KeyOutlet { key: key.into() }
    }

    pub fn key(&self) -> &Value {
        &self.key
    }
}

impl Node for KeyOutlet {
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value {
        inputs.get_key(0, &self.key)
    }

    fn input_key_decohered(&mut self, _port: usize, key: &Value, _effect: KeyEffect) -> Propagation {
        if *key == self.key {
            Propagation::Whole
        } else {
            Propagation::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_list_input_decoheres_touched_indices() {
        let mut graph = Dataflow::new();
        let list = graph.insert(["a", "b", "c"].into_iter().map(Value::from).collect::<ListInput>());
        let first = graph.insert(KeyOutlet::new(0));
        let last = graph.insert(KeyOutlet::new(2));
        graph.bind_input(first, 0, list);
        graph.bind_input(last, 0, list);
        graph.recohere();
        assert_eq!(graph.peek(last), Value::from("c"));

        assert_eq!(list.set(&mut graph, 2, "z"), Value::from("c"));
        assert!(graph.is_coherent(first));
        assert!(!graph.is_coherent(last));
        graph.recohere();
        assert_eq!(graph.peek(last), Value::from("z"));

        assert!(list.insert(&mut graph, 1, "x"));
        assert!(graph.is_coherent(first));
        graph.recohere();
        assert_eq!(graph.peek(last), Value::from("b"));

        assert_eq!(list.remove(&mut graph, 0), Value::from("a"));
        list.replace(&mut graph, vec![Value::from("x")]);
        graph.recohere();
        assert_eq!(graph.peek(first), Value::from("x"));
        assert_eq!(graph.peek(last), Value::Absent);
        assert_eq!(graph.get(list), Value::Record(Record::of([Item::from("x")])));
        assert!(!list.insert(&mut graph, 5, "y"));
    }

    #[test]
    fn test_map_output_sees_only_changed_keys() {
        let mut graph = Dataflow::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let input = graph.insert(MapInput::new());
        let output = {
            let seen = seen.clone();
            graph.insert(MapOutput::observed(move |k: &Value, v: Option<&Value>| {
                seen.borrow_mut().push((k.clone(), v.cloned()));
            }))
        };
        graph.bind_input(output, 0, input);
        input.update(&mut graph, "a", 1);
        input.update(&mut graph, "b", 2);
        graph.recohere();
        seen.borrow_mut().clear();

        input.update(&mut graph, "b", 3);
        graph.recohere();
        assert_eq!(*seen.borrow(), vec![(Value::from("b"), Some(Value::from(3)))]);

        input.remove(&mut graph, &Value::from("a"));
        graph.recohere();
        assert_eq!(seen.borrow().last(), Some(&(Value::from("a"), None)));
        assert_eq!(
            graph.get(output),
            Value::Record(Record::new().with_slot("b", 3))
        );
    }

    #[test]
    fn test_key_outlet_ignores_other_keys() {
        let mut graph = Dataflow::new();
        let input = graph.insert(MapInput::new());
        let light = graph.insert(KeyOutlet::new("light"));
        graph.bind_input(light, 0, input);
        input.update(&mut graph, "light", "on");
        assert_eq!(graph.get(light), Value::from("on"));

        input.update(&mut graph, "door", "open");
        assert!(graph.is_coherent(light));
        input.update(&mut graph, "light", "off");
        assert!(!graph.is_coherent(light));
        assert_eq!(graph.get(light), Value::from("off"));
    }

    #[test]
    fn test_replace_decoheres_only_differences() {
        let mut graph = Dataflow::new();
        let input = graph.insert(MapInput::from_iter([
            (Value::from("a"), Value::from(1)),
            (Value::from("b"), Value::from(2)),
        ]));
        let a = graph.insert(KeyOutlet::new("a"));
        let b = graph.insert(KeyOutlet::new("b"));
        graph.bind_input(a, 0, input);
        graph.bind_input(b, 0, input);
        graph.recohere();

        let entries = [(Value::from("a"), Value::from(1)), (Value::from("c"), Value::from(3))];
        input.replace(&mut graph, entries.into_iter().collect());
        assert!(graph.is_coherent(a));
        assert!(!graph.is_coherent(b));
        assert_eq!(graph.get(b), Value::Absent);
        assert_eq!(graph.keys(input), vec![Value::from("a"), Value::from("c")]);
    }

    #[test]
    fn test_memoize_caches_input() {
        let mut graph = Dataflow::new();
        let input = graph.insert(ValueInput::new(1));
        let memo = graph.insert(Memoize::new());
        graph.bind_input(memo, 0, input);
        graph.recohere();
        assert_eq!(graph.node(memo).map(|m| m.value().clone()), Some(Value::from(1)));
        assert_eq!(input.set(&mut graph, 2), Value::from(1));
        assert_eq!(graph.get(memo), Value::from(2));
    }
}
