use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use tracing::trace;

use crate::structure::{Item, Record, Value};

/// Generational index of a node in a [`Dataflow`] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Typed [`NodeId`]; gives access to the concrete node behind it.
pub struct Handle<T> {
    id: NodeId,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(id: NodeId) -> Self {
        Handle { id, marker: PhantomData }
    }

    pub fn id(self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.id).finish()
    }
}

impl<T> From<Handle<T>> for NodeId {
    fn from(handle: Handle<T>) -> NodeId {
        handle.id
    }
}

/// What happened to one key of a map-shaped node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyEffect {
    Update,
    Remove,
}

/// How a node reacts to one of its inputs going stale.
#[derive(Clone, Debug, PartialEq)]
pub enum Propagation {
    /// The node's whole value is stale.
    Whole,
    /// Only these keys of the node are stale.
    Keys(Vec<(Value, KeyEffect)>),
    /// The node does not depend on what changed.
    Ignore,
}

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A vertex of the dataflow graph.
///
/// Value-shaped nodes implement [`Node::evaluate`] only. Map-shaped nodes
/// also keep their own per-key state and recompute it key by key through
/// [`Node::evaluate_key`], so an update to one key never touches the others.
pub trait Node: AsAny {
    /// Recomputes the node's whole value from its inputs.
    fn evaluate(&mut self, inputs: &mut Inputs<'_>) -> Value;

    fn is_map(&self) -> bool {
        false
    }

    /// Recomputes a single key, reporting whether it is now present.
    fn evaluate_key(&mut self, _key: &Value, _inputs: &mut Inputs<'_>) -> KeyEffect {
        KeyEffect::Update
    }

    fn get_key(&self, _key: &Value) -> Value {
        Value::Absent
    }

    fn keys(&self) -> Vec<Value> {
        Vec::new()
    }

    /// Current state of a map-shaped node as a record of slots.
    fn snapshot(&self) -> Value {
        Value::Record(self.keys().into_iter().map(|key| {
            let value = self.get_key(&key);
            Item::slot(key, value)
        }).collect::<Record>())
    }

    fn input_decohered(&mut self, _port: usize) -> Propagation {
        Propagation::Whole
    }

    fn input_key_decohered(&mut self, _port: usize, _key: &Value, _effect: KeyEffect) -> Propagation {
        Propagation::Whole
    }
}

struct Slot {
    generation: u32,
    live: bool,
    // Taken out while the node recomputes.
    node: Option<Box<dyn Node>>,
    inputs: Vec<Option<NodeId>>,
    outputs: Vec<NodeId>,
    coherent: bool,
    version: u64,
    value: Value,
    stale_snapshot: bool,
    effects: BTreeMap<Value, KeyEffect>,
}

impl Slot {
    fn new(generation: u32, node: Box<dyn Node>) -> Self {
        Slot {
            generation,
            live: true,
            node: Some(node),
            inputs: Vec::new(),
            outputs: Vec::new(),
            coherent: false,
            version: 0,
            value: Value::Absent,
            stale_snapshot: false,
            effects: BTreeMap::new(),
        }
    }
}

/// Read access to a node's inputs while it recomputes.
pub struct Inputs<'g> {
    graph: &'g mut Dataflow,
    ports: Vec<Option<NodeId>>,
}

impl Inputs<'_> {
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn source(&self, port: usize) -> Option<NodeId> {
        self.ports.get(port).copied().flatten()
    }

    pub fn get(&mut self, port: usize) -> Value {
        match self.source(port) {
            Some(id) => self.graph.get(id),
            None => Value::Absent,
        }
    }

    pub fn get_key(&mut self, port: usize, key: &Value) -> Value {
        match self.source(port) {
            Some(id) => self.graph.get_key(id, key),
            None => Value::Absent,
        }
    }

    pub fn keys(&mut self, port: usize) -> Vec<Value> {
        match self.source(port) {
            Some(id) => self.graph.keys(id),
            None => Vec::new(),
        }
    }
}

/// Arena of dataflow nodes and the bindings between them.
///
/// `decohere` marks a node stale and pushes staleness to every node bound
/// downstream of it without recomputing anything. `recohere` recomputes stale
/// nodes inputs-first, at most once per version. `get` pulls a single node on
/// demand. Mutation is single-threaded; share a graph behind a lock.
#[derive(Default)]
pub struct Dataflow {
    slots: Vec<Slot>,
    free: Vec<u32>,
    dirty: Vec<NodeId>,
    version: u64,
}

impl Dataflow {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn insert<T: Node>(&mut self, node: T) -> Handle<T> {
        let node: Box<dyn Node> = Box::new(node);
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                *slot = Slot::new(slot.generation, node);
                NodeId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::new(0, node));
                NodeId { index, generation: 0 }
            }
        };
        self.dirty.push(id);
        Handle::new(id)
    }

    pub fn contains(&self, id: impl Into<NodeId>) -> bool {
        self.slot(id.into()).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.live).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node<T: Node>(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle.id)?.node.as_deref()?.as_any().downcast_ref::<T>()
    }

    /// Direct access to a node; callers decohere whatever they change.
    pub fn node_mut<T: Node>(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slot_mut(handle.id)?.node.as_deref_mut()?.as_any_mut().downcast_mut::<T>()
    }

    pub fn input(&self, target: impl Into<NodeId>, port: usize) -> Option<NodeId> {
        self.slot(target.into())?.inputs.get(port).copied().flatten()
    }

    pub fn outputs(&self, source: impl Into<NodeId>) -> Vec<NodeId> {
        self.slot(source.into()).map(|slot| slot.outputs.clone()).unwrap_or_default()
    }

    /// Binds `source` to input `port` of `target`, replacing any earlier binding.
    pub fn bind_input(&mut self, target: impl Into<NodeId>, port: usize, source: impl Into<NodeId>) -> bool {
        let (target, source) = (target.into(), source.into());
        if self.slot(source).is_none() {
            return false;
        }
        let previous = match self.slot_mut(target) {
            Some(slot) => {
                if slot.inputs.len() <= port {
                    slot.inputs.resize(port + 1, None);
                }
                std::mem::replace(&mut slot.inputs[port], Some(source))
            }
            None => return false,
        };
        if let Some(previous) = previous {
            self.detach_output(previous, target);
        }
        if let Some(slot) = self.slot_mut(source) {
            slot.outputs.push(target);
        }
        self.port_decohered(target, port);
        true
    }

    pub fn unbind_input(&mut self, target: impl Into<NodeId>, port: usize) -> Option<NodeId> {
        let target = target.into();
        let previous = self.slot_mut(target)?.inputs.get_mut(port)?.take()?;
        self.detach_output(previous, target);
        self.port_decohered(target, port);
        Some(previous)
    }

    /// Detaches a node from every binding and frees its slot. Stale ids are
    /// ignored, so removing twice is harmless.
    pub fn remove(&mut self, id: impl Into<NodeId>) -> Option<Box<dyn Node>> {
        let id = id.into();
        let slot = self.slot_mut(id)?;
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        let node = slot.node.take();
        let inputs = std::mem::take(&mut slot.inputs);
        let mut outputs = std::mem::take(&mut slot.outputs);
        slot.effects.clear();
        slot.value = Value::Absent;
        self.free.push(id.index);
        for source in inputs.into_iter().flatten() {
            self.detach_output(source, id);
        }
        outputs.sort();
        outputs.dedup();
        for target in outputs {
            let ports: Vec<usize> = match self.slot_mut(target) {
                Some(slot) => slot
                    .inputs
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, input)| **input == Some(id))
                    .map(|(port, input)| {
                        *input = None;
                        port
                    })
                    .collect(),
                None => continue,
            };
            for port in ports {
                self.port_decohered(target, port);
            }
        }
        trace!(index = id.index, generation = id.generation, "detached dataflow node");
        node
    }

    fn detach_output(&mut self, source: NodeId, target: NodeId) {
        if let Some(slot) = self.slot_mut(source) {
            if let Some(position) = slot.outputs.iter().position(|output| *output == target) {
                slot.outputs.remove(position);
            }
        }
    }

    fn unique_outputs(slot: &Slot) -> Vec<NodeId> {
        let mut outputs = slot.outputs.clone();
        outputs.sort();
        outputs.dedup();
        outputs
    }

    fn ports_of(&self, target: NodeId, source: NodeId) -> Vec<usize> {
        match self.slot(target) {
            Some(slot) => slot
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, input)| **input == Some(source))
                .map(|(port, _)| port)
                .collect(),
            None => Vec::new(),
        }
    }

    fn port_decohered(&mut self, target: NodeId, port: usize) {
        let propagation = match self.slot_mut(target).and_then(|slot| slot.node.as_mut()) {
            Some(node) => node.input_decohered(port),
            None => return,
        };
        self.propagate(target, propagation);
    }

    fn propagate(&mut self, id: NodeId, propagation: Propagation) {
        match propagation {
            Propagation::Whole => self.decohere(id),
            Propagation::Keys(keys) => {
                for (key, effect) in keys {
                    self.decohere_key(id, key, effect);
                }
            }
            Propagation::Ignore => {}
        }
    }

    /// Marks a node stale and propagates depth-first to its outputs.
    pub fn decohere(&mut self, id: impl Into<NodeId>) {
        let id = id.into();
        let outputs = match self.slot_mut(id) {
            Some(slot) if slot.coherent => {
                slot.coherent = false;
                Self::unique_outputs(slot)
            }
            _ => return,
        };
        self.dirty.push(id);
        for output in outputs {
            for port in self.ports_of(output, id) {
                self.port_decohered(output, port);
            }
        }
    }

    /// Marks one key of a map-shaped node stale and propagates it.
    pub fn decohere_key(&mut self, id: impl Into<NodeId>, key: Value, effect: KeyEffect) {
        let id = id.into();
        let outputs = match self.slot_mut(id) {
            Some(slot) => {
                if !slot.node.as_deref().is_some_and(|node| node.is_map()) {
                    self.decohere(id);
                    return;
                }
                if slot.effects.get(&key) == Some(&effect) {
                    return;
                }
                slot.effects.insert(key.clone(), effect);
                slot.stale_snapshot = true;
                Self::unique_outputs(slot)
            }
            None => return,
        };
        self.dirty.push(id);
        for output in outputs {
            for port in self.ports_of(output, id) {
                let propagation = match self.slot_mut(output).and_then(|slot| slot.node.as_mut()) {
                    Some(node) => node.input_key_decohered(port, &key, effect),
                    None => continue,
                };
                self.propagate(output, propagation);
            }
        }
    }

    pub fn is_coherent(&self, id: impl Into<NodeId>) -> bool {
        self.slot(id.into())
            .is_some_and(|slot| slot.coherent && slot.effects.is_empty())
    }

    /// Recomputes everything stale under a fresh version.
    pub fn recohere(&mut self) -> u64 {
        let version = self.next_version();
        self.recohere_at(version);
        version
    }

    /// Recomputes stale nodes; a node already recohered at `version` is
    /// left alone.
    pub fn recohere_at(&mut self, version: u64) {
        self.version = self.version.max(version);
        let mut dirty = std::mem::take(&mut self.dirty);
        dirty.sort();
        dirty.dedup();
        for &id in &dirty {
            self.recohere_node(id, version);
        }
        dirty.retain(|id| {
            self.slot(*id)
                .is_some_and(|slot| !slot.coherent || !slot.effects.is_empty())
        });
        self.dirty.extend(dirty);
    }

    /// Pulls one node and everything it depends on, returning its value.
    pub fn recohere_output(&mut self, id: impl Into<NodeId>) -> Value {
        let id = id.into();
        let version = self.next_version();
        self.recohere_node(id, version);
        self.snapshot(id)
    }

    fn recohere_node(&mut self, id: NodeId, version: u64) {
        let inputs = match self.slot_mut(id) {
            Some(slot) if slot.version != version && slot.node.is_some() => {
                slot.version = version;
                slot.inputs.clone()
            }
            _ => return,
        };
        for input in inputs.iter().flatten() {
            self.recohere_node(*input, version);
        }
        self.refresh(id, inputs);
    }

    fn refresh(&mut self, id: NodeId, ports: Vec<Option<NodeId>>) {
        let (mut node, coherent, effects) = match self.slot_mut(id) {
            Some(slot) if !slot.coherent || !slot.effects.is_empty() => match slot.node.take() {
                Some(node) => (node, slot.coherent, std::mem::take(&mut slot.effects)),
                None => return,
            },
            _ => return,
        };
        let mut inputs = Inputs { graph: self, ports };
        let value = if coherent {
            for key in effects.keys() {
                node.evaluate_key(key, &mut inputs);
            }
            None
        } else {
            Some(node.evaluate(&mut inputs))
        };
        if let Some(slot) = self.slot_mut(id) {
            slot.node = Some(node);
            match value {
                Some(value) => {
                    slot.value = value;
                    slot.coherent = true;
                    slot.stale_snapshot = false;
                }
                None => slot.stale_snapshot = true,
            }
        }
    }

    fn refresh_key(&mut self, id: NodeId, key: &Value) {
        let (mut node, ports) = match self.slot_mut(id) {
            Some(slot) => {
                if slot.effects.remove(key).is_none() {
                    return;
                }
                match slot.node.take() {
                    Some(node) => (node, slot.inputs.clone()),
                    None => return,
                }
            }
            None => return,
        };
        node.evaluate_key(key, &mut Inputs { graph: self, ports });
        if let Some(slot) = self.slot_mut(id) {
            slot.node = Some(node);
            slot.stale_snapshot = true;
        }
    }

    fn snapshot(&mut self, id: NodeId) -> Value {
        let Some(slot) = self.slot_mut(id) else {
            return Value::Absent;
        };
        if slot.stale_snapshot {
            if let Some(node) = slot.node.as_deref() {
                slot.value = node.snapshot();
                slot.stale_snapshot = false;
            }
        }
        slot.value.clone()
    }

    /// Current value, recomputing it first if stale. A node in the middle of
    /// its own recomputation reads as `Absent`.
    pub fn get(&mut self, id: impl Into<NodeId>) -> Value {
        let id = id.into();
        let pending = match self.slot(id) {
            Some(slot) if slot.node.is_some() => !slot.coherent || !slot.effects.is_empty(),
            _ => return Value::Absent,
        };
        if pending {
            let version = self.next_version();
            self.recohere_node(id, version);
        }
        self.snapshot(id)
    }

    /// Value of one key, recomputing only that key when the rest is coherent.
    pub fn get_key(&mut self, id: impl Into<NodeId>, key: &Value) -> Value {
        let id = id.into();
        let (is_map, coherent, pending) = match self.slot(id) {
            Some(slot) => match slot.node.as_deref() {
                Some(node) => (node.is_map(), slot.coherent, slot.effects.contains_key(key)),
                None => return Value::Absent,
            },
            None => return Value::Absent,
        };
        if !is_map {
            return self.get(id).get(key).clone();
        }
        if !coherent {
            let version = self.next_version();
            self.recohere_node(id, version);
        } else if pending {
            self.refresh_key(id, key);
        }
        self.slot(id)
            .and_then(|slot| slot.node.as_deref())
            .map_or(Value::Absent, |node| node.get_key(key))
    }

    pub fn keys(&mut self, id: impl Into<NodeId>) -> Vec<Value> {
        let id = id.into();
        let (is_map, pending) = match self.slot(id) {
            Some(slot) => match slot.node.as_deref() {
                Some(node) => (node.is_map(), !slot.coherent || !slot.effects.is_empty()),
                None => return Vec::new(),
            },
            None => return Vec::new(),
        };
        if !is_map {
            return match self.get(id) {
                Value::Record(record) => record.keys().collect(),
                _ => Vec::new(),
            };
        }
        if pending {
            let version = self.next_version();
            self.recohere_node(id, version);
        }
        self.slot(id)
            .and_then(|slot| slot.node.as_deref())
            .map_or_else(Vec::new, |node| node.keys())
    }

    /// Last computed value, without recomputing anything.
    pub fn peek(&self, id: impl Into<NodeId>) -> Value {
        match self.slot(id.into()) {
            Some(slot) => match slot.node.as_deref() {
                Some(node) if node.is_map() => node.snapshot(),
                _ => slot.value.clone(),
            },
            None => Value::Absent,
        }
    }
}

impl fmt::Debug for Dataflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataflow")
            .field("nodes", &self.len())
            .field("dirty", &self.dirty.len())
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamlet::{MapValue, ValueInput, ValueOutput};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn counting_double(calls: Rc<Cell<usize>>) -> MapValue {
        MapValue::new(move |v: &Value| {
            calls.set(calls.get() + 1);
            v.as_i64().map_or(Value::Absent, |n| Value::from(n * 2))
        })
    }

    #[test]
    fn test_recohere_memoizes_per_version() {
        let mut graph = Dataflow::new();
        let calls = Rc::new(Cell::new(0));
        let input = graph.insert(ValueInput::new(3));
        let double = graph.insert(counting_double(calls.clone()));
        graph.bind_input(double, 0, input);

        graph.recohere_at(1);
        assert_eq!(calls.get(), 1);
        assert_eq!(graph.peek(double), Value::from(6));

        graph.decohere(double);
        graph.recohere_at(1);
        assert_eq!(calls.get(), 1);

        graph.recohere_at(2);
        assert_eq!(calls.get(), 2);
        graph.recohere_at(2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_get_pulls_lazily() {
        let mut graph = Dataflow::new();
        let calls = Rc::new(Cell::new(0));
        let input = graph.insert(ValueInput::new(1));
        let double = graph.insert(counting_double(calls.clone()));
        graph.bind_input(double, 0, input);
        assert_eq!(calls.get(), 0);

        input.set(&mut graph, 5);
        assert_eq!(calls.get(), 0);
        assert_eq!(graph.get(double), Value::from(10));
        assert_eq!(graph.get(double), Value::from(10));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_decohere_reaches_transitive_outputs() {
        let mut graph = Dataflow::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let input = graph.insert(ValueInput::new(1));
        let double = graph.insert(MapValue::new(|v: &Value| {
            v.as_i64().map_or(Value::Absent, |n| Value::from(n * 2))
        }));
        let sink = {
            let seen = seen.clone();
            graph.insert(ValueOutput::observed(move |v: &Value| seen.borrow_mut().push(v.clone())))
        };
        graph.bind_input(double, 0, input);
        graph.bind_input(sink, 0, double);
        graph.recohere();

        input.set(&mut graph, 4);
        assert!(!graph.is_coherent(double));
        assert!(!graph.is_coherent(sink));
        graph.recohere();
        assert_eq!(*seen.borrow(), vec![Value::from(2), Value::from(8)]);
    }

    #[test]
    fn test_remove_detaches_and_is_idempotent() {
        let mut graph = Dataflow::new();
        let input = graph.insert(ValueInput::new("on"));
        let sink = graph.insert(ValueOutput::new());
        graph.bind_input(sink, 0, input);
        graph.recohere();
        assert_eq!(graph.peek(sink), Value::from("on"));

        assert!(graph.remove(input).is_some());
        assert!(graph.remove(input).is_none());
        assert!(!graph.contains(input));
        assert_eq!(graph.input(sink, 0), None);
        assert_eq!(graph.get(sink), Value::Absent);

        // the freed slot is reused under a new generation
        let other = graph.insert(ValueInput::new(1));
        assert_ne!(other.id(), input.id());
        assert!(graph.node(input).is_none());
        assert_eq!(graph.node(other).map(|n| n.value().clone()), Some(Value::from(1)));
    }

    #[test]
    fn test_unbind_input() {
        let mut graph = Dataflow::new();
        let input = graph.insert(ValueInput::new(1));
        let sink = graph.insert(ValueOutput::new());
        graph.bind_input(sink, 0, input);
        assert_eq!(graph.get(sink), Value::from(1));
        assert_eq!(graph.unbind_input(sink, 0), Some(input.id()));
        assert!(graph.outputs(input).is_empty());
        assert_eq!(graph.get(sink), Value::Absent);
    }

    #[test]
    fn test_cycle_reads_absent() {
        let mut graph = Dataflow::new();
        let a = graph.insert(MapValue::new(|v: &Value| v.clone()));
        let b = graph.insert(MapValue::new(|v: &Value| v.clone()));
        graph.bind_input(a, 0, b);
        graph.bind_input(b, 0, a);
        assert_eq!(graph.get(a), Value::Absent);
        graph.recohere();
        assert_eq!(graph.peek(b), Value::Absent);
    }
}
