use tracing::warn;

use super::client::{Client, DownlinkId};
use super::observer::Observers;
use super::DownlinkError;
use crate::streamlet::{Dataflow, Handle, ListInput};
use crate::structure::{Record, Value};

/// Indexed operation carried in a list lane's event and command bodies.
#[derive(Clone, Debug, PartialEq)]
pub enum ListAction {
    Update { index: usize, value: Value },
    Insert { index: usize, value: Value },
    Remove { index: usize },
    Move { from: usize, to: usize },
    Clear,
    Take(usize),
    Drop(usize),
}

fn index(value: &Value) -> Option<usize> {
    value.as_i64().and_then(|n| usize::try_from(n).ok())
}

/// Effect of an applied action on one index.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ListChange {
    Updated { index: usize, value: Value, old: Value },
    Removed { index: usize, old: Value },
}

impl ListAction {
    pub fn from_value(body: &Value) -> Option<ListAction> {
        let record = body.as_record()?;
        let header = record.header();
        let at = || index(header.get_str("index"));
        match record.tag()? {
            "update" => Some(ListAction::Update { index: at()?, value: record.body() }),
            "insert" => Some(ListAction::Insert { index: at()?, value: record.body() }),
            "remove" => Some(ListAction::Remove { index: at()? }),
            "move" => Some(ListAction::Move {
                from: index(header.get_str("from"))?,
                to: index(header.get_str("to"))?,
            }),
            "clear" => Some(ListAction::Clear),
            "take" => index(header).map(ListAction::Take),
            "drop" => index(header).map(ListAction::Drop),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        let at = |tag: &str, index: usize| Record::new().with_attr(tag, Record::new().with_slot("index", index as u64));
        let record = match self {
            ListAction::Update { index, value } => {
                let mut record = at("update", *index);
                record.push_body(value);
                record
            }
            ListAction::Insert { index, value } => {
                let mut record = at("insert", *index);
                record.push_body(value);
                record
            }
            ListAction::Remove { index } => at("remove", *index),
            ListAction::Move { from, to } => Record::new().with_attr(
                "move",
                Record::new().with_slot("from", *from as u64).with_slot("to", *to as u64),
            ),
            ListAction::Clear => Record::new().with_attr("clear", Value::Extant),
            ListAction::Take(n) => Record::new().with_attr("take", *n as u64),
            ListAction::Drop(n) => Record::new().with_attr("drop", *n as u64),
        };
        Value::Record(record)
    }

    /// Applies the action; an out-of-range index leaves `items` untouched.
    pub(crate) fn apply_to(&self, items: &mut Vec<Value>) -> Option<Vec<ListChange>> {
        let len = items.len();
        let changes = match self {
            ListAction::Update { index, value } if *index < len => {
                let old = std::mem::replace(&mut items[*index], value.clone());
                vec![ListChange::Updated { index: *index, value: value.clone(), old }]
            }
            // updating one past the end appends
            ListAction::Update { index, value } | ListAction::Insert { index, value } if *index <= len => {
                items.insert(*index, value.clone());
                vec![ListChange::Updated { index: *index, value: value.clone(), old: Value::Absent }]
            }
            ListAction::Remove { index } if *index < len => {
                vec![ListChange::Removed { index: *index, old: items.remove(*index) }]
            }
            ListAction::Move { from, to } if *from < len && *to < len => {
                let item = items.remove(*from);
                items.insert(*to, item);
                Vec::new()
            }
            ListAction::Clear => drain(items, 0..len),
            ListAction::Take(n) => drain(items, (*n).min(len)..len),
            ListAction::Drop(n) => drain(items, 0..(*n).min(len)),
            _ => return None,
        };
        Some(changes)
    }
}

fn drain(items: &mut Vec<Value>, range: std::ops::Range<usize>) -> Vec<ListChange> {
    let start = range.start;
    items
        .drain(range)
        .enumerate()
        .map(|(offset, old)| ListChange::Removed { index: start + offset, old })
        .collect()
}

/// Handle to a downlink whose state is an ordered sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ListDownlink {
    pub(crate) id: DownlinkId,
    pub(crate) outlet: Handle<ListInput>,
}

impl ListDownlink {
    pub fn id(&self) -> DownlinkId {
        self.id
    }

    /// Graph node keyed by item index; its whole value is a record of
    /// positional items.
    pub fn outlet(&self) -> Handle<ListInput> {
        self.outlet
    }

    pub fn get(&self, client: &mut Client) -> Value {
        client.graph_mut().get(self.outlet)
    }

    pub fn get_index(&self, client: &mut Client, index: usize) -> Value {
        client.graph_mut().get_key(self.outlet, &Value::from(index as u64))
    }

    pub fn push(&self, client: &mut Client, value: impl Into<Value>) -> Result<(), DownlinkError> {
        let index = self.len(client);
        client.apply_list(self.id, ListAction::Insert { index, value: value.into() })
    }

    pub fn set(&self, client: &mut Client, index: usize, value: impl Into<Value>) -> Result<(), DownlinkError> {
        client.apply_list(self.id, ListAction::Update { index, value: value.into() })
    }

    pub fn remove(&self, client: &mut Client, index: usize) -> Result<(), DownlinkError> {
        client.apply_list(self.id, ListAction::Remove { index })
    }

    pub fn len(&self, client: &Client) -> usize {
        client.graph().node(self.outlet).map_or(0, ListInput::len)
    }
}

pub(crate) struct ListModel {
    pub(crate) outlet: Handle<ListInput>,
    items: Vec<Value>,
    staged: Option<Vec<Value>>,
}

impl ListModel {
    pub(crate) fn new(outlet: Handle<ListInput>) -> Self {
        ListModel { outlet, items: Vec::new(), staged: None }
    }

    pub(crate) fn begin_sync(&mut self) {
        self.staged = Some(Vec::new());
    }

    pub(crate) fn abort_sync(&mut self) {
        self.staged = None;
    }

    fn publish(&self, graph: &mut Dataflow) {
        self.outlet.replace(graph, self.items.clone());
    }

    pub(crate) fn apply(&mut self, graph: &mut Dataflow, action: &ListAction, observers: &mut Observers) {
        let target = self.staged.as_mut().unwrap_or(&mut self.items);
        let Some(changes) = action.apply_to(target) else {
            warn!(?action, len = target.len(), "list action out of range");
            return;
        };
        if self.staged.is_some() {
            return;
        }
        self.publish(graph);
        for change in changes {
            match change {
                ListChange::Updated { index, value, old } => {
                    observers.each(|o| o.did_update(&Value::from(index as u64), &value, &old))
                }
                ListChange::Removed { index, old } => {
                    observers.each(|o| o.did_remove(&Value::from(index as u64), &old))
                }
            }
        }
    }

    pub(crate) fn on_synced(&mut self, graph: &mut Dataflow, observers: &mut Observers) {
        let Some(staged) = self.staged.take() else {
            return;
        };
        let old = std::mem::replace(&mut self.items, staged);
        self.publish(graph);
        for (index, value) in self.items.iter().enumerate() {
            let previous = old.get(index).cloned().unwrap_or_default();
            if previous != *value {
                observers.each(|o| o.did_update(&Value::from(index as u64), value, &previous));
            }
        }
        for (index, previous) in old.iter().enumerate().skip(self.items.len()) {
            observers.each(|o| o.did_remove(&Value::from(index as u64), previous));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recon;

    fn values(items: &[i32]) -> Vec<Value> {
        items.iter().copied().map(Value::from).collect()
    }

    #[test]
    fn test_apply_actions() {
        let mut items = values(&[1, 2, 3]);
        assert!(ListAction::Insert { index: 1, value: Value::from(9) }.apply_to(&mut items).is_some());
        assert_eq!(items, values(&[1, 9, 2, 3]));
        ListAction::Move { from: 0, to: 3 }.apply_to(&mut items);
        assert_eq!(items, values(&[9, 2, 3, 1]));
        ListAction::Update { index: 4, value: Value::from(5) }.apply_to(&mut items);
        assert_eq!(items, values(&[9, 2, 3, 1, 5]));
        assert_eq!(ListAction::Remove { index: 7 }.apply_to(&mut items), None);
        let removed = ListAction::Drop(2).apply_to(&mut items).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(items, values(&[3, 1, 5]));
        ListAction::Take(1).apply_to(&mut items);
        assert_eq!(items, values(&[3]));
    }

    #[test]
    fn test_actions_round_trip_through_recon() {
        for action in [
            ListAction::Update { index: 0, value: Value::from("a") },
            ListAction::Insert { index: 2, value: Value::Record(Record::new().with_slot("x", 1).with_slot("y", 2)) },
            ListAction::Remove { index: 1 },
            ListAction::Move { from: 3, to: 0 },
            ListAction::Clear,
            ListAction::Take(4),
        ] {
            let text = recon::write(&action.to_value());
            assert_eq!(ListAction::from_value(&recon::parse(&text).unwrap()), Some(action), "{}", text);
        }
    }
}
