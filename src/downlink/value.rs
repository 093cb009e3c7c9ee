use super::client::{Client, DownlinkId};
use super::observer::Observers;
use super::DownlinkError;
use crate::streamlet::{Dataflow, Handle, ValueInput};
use crate::structure::Value;

/// Handle to a downlink whose state is a single value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValueDownlink {
    pub(crate) id: DownlinkId,
    pub(crate) outlet: Handle<ValueInput>,
}

impl ValueDownlink {
    pub fn id(&self) -> DownlinkId {
        self.id
    }

    /// Graph node carrying the synced state; bind dependents to it.
    pub fn outlet(&self) -> Handle<ValueInput> {
        self.outlet
    }

    pub fn get(&self, client: &mut Client) -> Value {
        client.graph_mut().get(self.outlet)
    }

    /// Sets the local state and sends it upstream as a command.
    pub fn set(&self, client: &mut Client, value: impl Into<Value>) -> Result<Value, DownlinkError> {
        client.set_value(self.id, value.into())
    }
}

pub(crate) struct ValueModel {
    pub(crate) outlet: Handle<ValueInput>,
    staged: Option<Option<Value>>,
}

impl ValueModel {
    pub(crate) fn new(outlet: Handle<ValueInput>) -> Self {
        ValueModel { outlet, staged: None }
    }

    pub(crate) fn begin_sync(&mut self) {
        self.staged = Some(None);
    }

    pub(crate) fn abort_sync(&mut self) {
        self.staged = None;
    }

    pub(crate) fn on_event(&mut self, graph: &mut Dataflow, body: Value, observers: &mut Observers) {
        match &mut self.staged {
            Some(staged) => *staged = Some(body),
            None => {
                self.set(graph, body, observers);
            }
        }
    }

    pub(crate) fn on_synced(&mut self, graph: &mut Dataflow, observers: &mut Observers) {
        if let Some(Some(value)) = self.staged.take() {
            self.set(graph, value, observers);
        }
    }

    pub(crate) fn set(&mut self, graph: &mut Dataflow, value: Value, observers: &mut Observers) -> Value {
        let old = self.outlet.set(graph, value.clone());
        observers.each(|o| o.did_set(&value, &old));
        old
    }
}
