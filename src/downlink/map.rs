use std::collections::BTreeMap;

use super::client::{Client, DownlinkId};
use super::observer::Observers;
use super::DownlinkError;
use crate::streamlet::{Dataflow, Handle, MapInput};
use crate::structure::{Record, Value};

/// Keyed operation carried in a map lane's event and command bodies.
#[derive(Clone, Debug, PartialEq)]
pub enum MapAction {
    Update { key: Value, value: Value },
    Remove { key: Value },
    Clear,
    /// Keep the first `n` keys
    Take(usize),
    /// Discard the first `n` keys
    Drop(usize),
}

fn count(header: &Value) -> Option<usize> {
    header.as_i64().and_then(|n| usize::try_from(n).ok())
}

impl MapAction {
    pub fn from_value(body: &Value) -> Option<MapAction> {
        let record = body.as_record()?;
        let header = record.header();
        let key = || Some(header.get_str("key").clone()).filter(Value::is_defined);
        match record.tag()? {
            "update" => Some(MapAction::Update { key: key()?, value: record.body() }),
            "remove" => Some(MapAction::Remove { key: key()? }),
            "clear" => Some(MapAction::Clear),
            "take" => count(header).map(MapAction::Take),
            "drop" => count(header).map(MapAction::Drop),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        let keyed = |tag: &str, key: &Value| Record::new().with_attr(tag, Record::new().with_slot("key", key.clone()));
        let record = match self {
            MapAction::Update { key, value } => {
                let mut record = keyed("update", key);
                record.push_body(value);
                record
            }
            MapAction::Remove { key } => keyed("remove", key),
            MapAction::Clear => Record::new().with_attr("clear", Value::Extant),
            MapAction::Take(n) => Record::new().with_attr("take", *n as u64),
            MapAction::Drop(n) => Record::new().with_attr("drop", *n as u64),
        };
        Value::Record(record)
    }

    /// Applies the action to a plain map, returning the removed entries.
    pub(crate) fn apply_to(&self, map: &mut BTreeMap<Value, Value>) -> Vec<(Value, Value)> {
        let doomed: Vec<Value> = match self {
            MapAction::Update { key, value } => {
                map.insert(key.clone(), value.clone());
                Vec::new()
            }
            MapAction::Remove { key } => vec![key.clone()],
            MapAction::Clear => map.keys().cloned().collect(),
            MapAction::Take(n) => map.keys().skip(*n).cloned().collect(),
            MapAction::Drop(n) => map.keys().take(*n).cloned().collect(),
        };
        doomed
            .into_iter()
            .filter_map(|key| map.remove(&key).map(|old| (key, old)))
            .collect()
    }
}

/// Handle to a downlink whose state is a key-ordered map.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MapDownlink {
    pub(crate) id: DownlinkId,
    pub(crate) outlet: Handle<MapInput>,
}

impl MapDownlink {
    pub fn id(&self) -> DownlinkId {
        self.id
    }

    pub fn outlet(&self) -> Handle<MapInput> {
        self.outlet
    }

    pub fn get(&self, client: &mut Client, key: &Value) -> Value {
        client.graph_mut().get_key(self.outlet, key)
    }

    pub fn snapshot(&self, client: &mut Client) -> Value {
        client.graph_mut().get(self.outlet)
    }

    pub fn update(&self, client: &mut Client, key: impl Into<Value>, value: impl Into<Value>) -> Result<(), DownlinkError> {
        client.apply_map(self.id, MapAction::Update { key: key.into(), value: value.into() })
    }

    pub fn remove(&self, client: &mut Client, key: impl Into<Value>) -> Result<(), DownlinkError> {
        client.apply_map(self.id, MapAction::Remove { key: key.into() })
    }

    pub fn clear(&self, client: &mut Client) -> Result<(), DownlinkError> {
        client.apply_map(self.id, MapAction::Clear)
    }
}

pub(crate) struct MapModel {
    pub(crate) outlet: Handle<MapInput>,
    staged: Option<BTreeMap<Value, Value>>,
}

impl MapModel {
    pub(crate) fn new(outlet: Handle<MapInput>) -> Self {
        MapModel { outlet, staged: None }
    }

    pub(crate) fn begin_sync(&mut self) {
        self.staged = Some(BTreeMap::new());
    }

    pub(crate) fn abort_sync(&mut self) {
        self.staged = None;
    }

    fn current(&self, graph: &Dataflow) -> BTreeMap<Value, Value> {
        graph
            .node(self.outlet)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub(crate) fn apply(&mut self, graph: &mut Dataflow, action: &MapAction, observers: &mut Observers) {
        if let Some(staged) = self.staged.as_mut() {
            action.apply_to(staged);
            return;
        }
        match action {
            MapAction::Update { key, value } => {
                let old = self.outlet.update(graph, key.clone(), value.clone());
                observers.each(|o| o.did_update(key, value, &old));
            }
            _ => {
                let mut map = self.current(graph);
                for (key, old) in action.apply_to(&mut map) {
                    self.outlet.remove(graph, &key);
                    observers.each(|o| o.did_remove(&key, &old));
                }
            }
        }
    }

    /// Replaces the visible map with the synced one, reporting differences.
    pub(crate) fn on_synced(&mut self, graph: &mut Dataflow, observers: &mut Observers) {
        let Some(staged) = self.staged.take() else {
            return;
        };
        let current = self.current(graph);
        for (key, old) in &current {
            if !staged.contains_key(key) {
                observers.each(|o| o.did_remove(key, old));
            }
        }
        for (key, value) in &staged {
            match current.get(key) {
                Some(old) if old == value => {}
                old => {
                    let old = old.cloned().unwrap_or_default();
                    observers.each(|o| o.did_update(key, value, &old));
                }
            }
        }
        self.outlet.replace(graph, staged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon;

    #[test]
    fn test_actions_parse_from_recon() {
        let update = recon::parse("@update(key:kitchen) {on:true,level:3}").unwrap();
        assert_eq!(
            MapAction::from_value(&update),
            Some(MapAction::Update {
                key: Value::from("kitchen"),
                value: Value::Record(Record::new().with_slot("on", true).with_slot("level", 3)),
            })
        );
        let remove = recon::parse("@remove(key:kitchen)").unwrap();
        assert_eq!(MapAction::from_value(&remove), Some(MapAction::Remove { key: Value::from("kitchen") }));
        assert_eq!(MapAction::from_value(&recon::parse("@take(2)").unwrap()), Some(MapAction::Take(2)));
        assert_eq!(MapAction::from_value(&recon::parse("@update(level:1) 2").unwrap()), None);
        assert_eq!(MapAction::from_value(&Value::from(1)), None);
    }

    #[test]
    fn test_actions_write_back() {
        for action in [
            MapAction::Update { key: Value::from("a"), value: Value::from(1) },
            MapAction::Update { key: Value::from(2), value: Value::Record(Record::new().with_slot("x", 1)) },
            MapAction::Remove { key: Value::from("a") },
            MapAction::Clear,
            MapAction::Drop(3),
        ] {
            let text = recon::write(&action.to_value());
            assert_eq!(MapAction::from_value(&recon::parse(&text).unwrap()), Some(action), "{}", text);
        }
    }

    #[test]
    fn test_take_and_drop_follow_key_order() {
        let mut map: BTreeMap<Value, Value> = (1..=4).map(|i| (Value::from(i), Value::from(i * 10))).collect();
        let removed = MapAction::Drop(1).apply_to(&mut map);
        assert_eq!(removed, vec![(Value::from(1), Value::from(10))]);
        let removed = MapAction::Take(2).apply_to(&mut map);
        assert_eq!(removed, vec![(Value::from(4), Value::from(40))]);
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec![Value::from(2), Value::from(3)]);
    }
}
