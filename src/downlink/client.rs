use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::config::{ClientConfig, DownlinkOptions};
use super::host::{AuthState, Host};
use super::list::{ListAction, ListDownlink, ListModel};
use super::map::{MapAction, MapDownlink, MapModel};
use super::observer::{DownlinkObserver, Observers};
use super::value::{ValueDownlink, ValueModel};
use super::{DownlinkError, TransportError};
use crate::streamlet::{Dataflow, ListInput, MapInput, NodeId, ValueInput};
use crate::structure::Value;
use crate::uri::Uri;
use crate::warp::{Envelope, EnvelopeError, Link, LinkEvent, LinkState};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DownlinkId(u64);

/// Delivers rendered envelopes to a host.
pub trait Transport {
    fn send(&mut self, host: &Uri, envelope: &str) -> anyhow::Result<()>;
}

enum Model {
    Value(ValueModel),
    Map(MapModel),
    List(ListModel),
}

impl Model {
    fn outlet(&self) -> NodeId {
        match self {
            Model::Value(m) => m.outlet.id(),
            Model::Map(m) => m.outlet.id(),
            Model::List(m) => m.outlet.id(),
        }
    }

    fn begin_sync(&mut self) {
        match self {
            Model::Value(m) => m.begin_sync(),
            Model::Map(m) => m.begin_sync(),
            Model::List(m) => m.begin_sync(),
        }
    }

    fn abort_sync(&mut self) {
        match self {
            Model::Value(m) => m.abort_sync(),
            Model::Map(m) => m.abort_sync(),
            Model::List(m) => m.abort_sync(),
        }
    }

    fn on_event(&mut self, graph: &mut Dataflow, body: Value, observers: &mut Observers) {
        match self {
            Model::Value(m) => m.on_event(graph, body, observers),
            Model::Map(m) => match MapAction::from_value(&body) {
                Some(action) => m.apply(graph, &action, observers),
                None => warn!(?body, "unrecognized map event"),
            },
            Model::List(m) => match ListAction::from_value(&body) {
                Some(action) => m.apply(graph, &action, observers),
                None => warn!(?body, "unrecognized list event"),
            },
        }
    }

    fn on_synced(&mut self, graph: &mut Dataflow, observers: &mut Observers) {
        match self {
            Model::Value(m) => m.on_synced(graph, observers),
            Model::Map(m) => m.on_synced(graph, observers),
            Model::List(m) => m.on_synced(graph, observers),
        }
    }
}

struct Downlink {
    host: Uri,
    node: Uri,
    lane: String,
    options: DownlinkOptions,
    link: Link,
    model: Model,
    observers: Observers,
    attempts: u32,
    relink_at: Option<Instant>,
}

impl Downlink {
    fn route(&self) -> Route {
        (self.host.clone(), self.node.clone(), self.lane.clone())
    }
}

type Route = (Uri, Uri, String);

struct Target {
    host: Uri,
    node: Uri,
    wire: String,
    lane: String,
}

/// Downlink runtime for any number of hosts.
///
/// The client performs no I/O. Inbound envelopes are fed to [`Client::receive`];
/// outbound ones queue per host and leave through [`Client::poll_outgoing`] or
/// [`Client::flush`]. Downlink state is published into the client's
/// [`Dataflow`] graph, recohered after every inbound envelope.
pub struct Client {
    config: ClientConfig,
    graph: Dataflow,
    hosts: HashMap<Uri, Host>,
    downlinks: HashMap<DownlinkId, Downlink>,
    routes: HashMap<Route, DownlinkId>,
    next_id: u64,
}

impl Default for Client {
    fn default() -> Self {
        Client::new(ClientConfig::default())
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            config,
            graph: Dataflow::new(),
            hosts: HashMap::new(),
            downlinks: HashMap::new(),
            routes: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn graph(&self) -> &Dataflow {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Dataflow {
        &mut self.graph
    }

    pub fn host(&self, host: &Uri) -> Option<&Host> {
        self.hosts.get(host)
    }

    pub fn auth_state(&self, host: &Uri) -> Option<&AuthState> {
        self.hosts.get(host).map(Host::auth)
    }

    fn host_mut(&mut self, host: &Uri) -> &mut Host {
        let cache_size = self.config.uri_cache_size;
        self.hosts
            .entry(host.clone())
            .or_insert_with(|| Host::new(host.clone(), cache_size))
    }

    fn prepare(&mut self, host: &Uri, node: &str, lane: &str) -> Result<Target, DownlinkError> {
        let entry = self.host_mut(host);
        let node = entry.resolve(node)?;
        let wire = entry.unresolve(&node);
        let route = (host.clone(), node, lane.to_string());
        if self.routes.contains_key(&route) {
            return Err(DownlinkError::Duplicate {
                host: host.to_string(),
                node: route.1.to_string(),
                lane: route.2,
            });
        }
        let (host, node, lane) = route;
        Ok(Target { host, node, wire, lane })
    }

    fn register(&mut self, target: Target, options: DownlinkOptions, model: Model) -> DownlinkId {
        let id = DownlinkId(self.next_id);
        self.next_id += 1;
        let mut downlink = Downlink {
            link: Link::new(target.wire, target.lane.as_str()).with_prio(options.prio, options.rate),
            host: target.host,
            node: target.node,
            lane: target.lane,
            options,
            model,
            observers: Observers::default(),
            attempts: 0,
            relink_at: None,
        };
        if let Some(request) = downlink.link.open(downlink.options.keep_synced) {
            self.host_mut(&downlink.host).push(request);
        }
        debug!(id = id.0, host = %downlink.host, node = %downlink.node, lane = %downlink.lane, "opened downlink");
        self.routes.insert(downlink.route(), id);
        self.downlinks.insert(id, downlink);
        id
    }

    pub fn open_value_downlink(
        &mut self,
        host: &Uri,
        node: &str,
        lane: &str,
        options: DownlinkOptions,
    ) -> Result<ValueDownlink, DownlinkError> {
        let target = self.prepare(host, node, lane)?;
        let outlet = self.graph.insert(ValueInput::default());
        let id = self.register(target, options, Model::Value(ValueModel::new(outlet)));
        Ok(ValueDownlink { id, outlet })
    }

    pub fn open_map_downlink(
        &mut self,
        host: &Uri,
        node: &str,
        lane: &str,
        options: DownlinkOptions,
    ) -> Result<MapDownlink, DownlinkError> {
        let target = self.prepare(host, node, lane)?;
        let outlet = self.graph.insert(MapInput::new());
        let id = self.register(target, options, Model::Map(MapModel::new(outlet)));
        Ok(MapDownlink { id, outlet })
    }

    pub fn open_list_downlink(
        &mut self,
        host: &Uri,
        node: &str,
        lane: &str,
        options: DownlinkOptions,
    ) -> Result<ListDownlink, DownlinkError> {
        let target = self.prepare(host, node, lane)?;
        let outlet = self.graph.insert(ListInput::new());
        let id = self.register(target, options, Model::List(ListModel::new(outlet)));
        Ok(ListDownlink { id, outlet })
    }

    pub fn observe(&mut self, id: DownlinkId, observer: impl DownlinkObserver + 'static) -> Result<(), DownlinkError> {
        let downlink = self.downlinks.get_mut(&id).ok_or(DownlinkError::Unknown(id))?;
        downlink.observers.push(Box::new(observer));
        Ok(())
    }

    pub fn state(&self, id: DownlinkId) -> Option<LinkState> {
        self.downlinks.get(&id).map(|downlink| downlink.link.state())
    }

    /// Unlinks and detaches a downlink. Later envelopes for its address are dropped.
    pub fn close_downlink(&mut self, id: DownlinkId) -> Result<(), DownlinkError> {
        let downlink = self.downlinks.get_mut(&id).ok_or(DownlinkError::Unknown(id))?;
        if let Some(unlink) = downlink.link.close() {
            if let Some(host) = self.hosts.get_mut(&downlink.host).filter(|host| host.is_connected()) {
                host.push(unlink);
            }
        }
        self.detach(id);
        Ok(())
    }

    fn detach(&mut self, id: DownlinkId) {
        let Some(mut downlink) = self.downlinks.remove(&id) else {
            return;
        };
        self.routes.remove(&downlink.route());
        self.graph.remove(downlink.model.outlet());
        downlink.observers.each(|o| o.did_close());
        self.graph.recohere();
        debug!(id = id.0, node = %downlink.node, lane = %downlink.lane, "closed downlink");
    }

    fn send_command(&mut self, id: DownlinkId, body: Value) {
        if let Some(downlink) = self.downlinks.get(&id) {
            let command = Envelope::command(downlink.link.node(), downlink.lane.as_str(), body);
            if let Some(host) = self.hosts.get_mut(&downlink.host) {
                host.push(command);
            }
        }
    }

    pub(crate) fn set_value(&mut self, id: DownlinkId, value: Value) -> Result<Value, DownlinkError> {
        let downlink = self.downlinks.get_mut(&id).ok_or(DownlinkError::Unknown(id))?;
        let Model::Value(model) = &mut downlink.model else {
            return Err(DownlinkError::WrongKind(id, "value"));
        };
        let old = model.set(&mut self.graph, value.clone(), &mut downlink.observers);
        self.send_command(id, value);
        self.graph.recohere();
        Ok(old)
    }

    pub(crate) fn apply_map(&mut self, id: DownlinkId, action: MapAction) -> Result<(), DownlinkError> {
        let downlink = self.downlinks.get_mut(&id).ok_or(DownlinkError::Unknown(id))?;
        let Model::Map(model) = &mut downlink.model else {
            return Err(DownlinkError::WrongKind(id, "map"));
        };
        model.apply(&mut self.graph, &action, &mut downlink.observers);
        self.send_command(id, action.to_value());
        self.graph.recohere();
        Ok(())
    }

    pub(crate) fn apply_list(&mut self, id: DownlinkId, action: ListAction) -> Result<(), DownlinkError> {
        let downlink = self.downlinks.get_mut(&id).ok_or(DownlinkError::Unknown(id))?;
        let Model::List(model) = &mut downlink.model else {
            return Err(DownlinkError::WrongKind(id, "list"));
        };
        model.apply(&mut self.graph, &action, &mut downlink.observers);
        self.send_command(id, action.to_value());
        self.graph.recohere();
        Ok(())
    }

    /// Queues a one-way command; no downlink is needed.
    pub fn command(&mut self, host: &Uri, node: &str, lane: &str, body: impl Into<Value>) -> Result<(), DownlinkError> {
        let entry = self.host_mut(host);
        let node = entry.resolve(node)?;
        let wire = entry.unresolve(&node);
        entry.push(Envelope::command(wire, lane, body));
        Ok(())
    }

    pub fn authenticate(&mut self, host: &Uri, credentials: impl Into<Value>) {
        self.host_mut(host).authenticate(credentials.into());
    }

    pub fn deauthenticate(&mut self, host: &Uri, body: impl Into<Value>) {
        self.host_mut(host).deauthenticate(body.into());
    }

    pub fn poll_outgoing(&mut self, host: &Uri) -> Option<Envelope> {
        self.hosts.get_mut(host)?.pop()
    }

    /// Sends everything queued for connected hosts. A failed send drops the
    /// host's connection and schedules its downlinks to relink.
    pub fn flush<T: Transport>(&mut self, transport: &mut T) -> Result<usize, TransportError> {
        let mut sent = 0;
        let mut failed = None;
        for host in self.hosts.values_mut().filter(|host| host.is_connected()) {
            while let Some(envelope) = host.pop() {
                let text = envelope.to_recon();
                if let Err(source) = transport.send(host.uri(), &text) {
                    failed = Some((host.uri().clone(), source));
                    break;
                }
                trace!(host = %host.uri(), envelope = %text, "sent");
                sent += 1;
            }
            if failed.is_some() {
                break;
            }
        }
        match failed {
            Some((host, source)) => {
                warn!(host = %host, error = %source, "transport failed");
                self.disconnected(&host);
                Err(TransportError::Send { host: host.to_string(), source })
            }
            None => Ok(sent),
        }
    }

    pub fn receive_text(&mut self, host: &Uri, text: &str) -> Result<(), EnvelopeError> {
        let envelope = Envelope::parse(text)?;
        self.receive(host, envelope);
        Ok(())
    }

    /// Applies one inbound envelope, then recoheres the graph.
    pub fn receive(&mut self, host: &Uri, envelope: Envelope) {
        let Some(entry) = self.hosts.get_mut(host) else {
            warn!(host = %host, tag = envelope.tag(), "envelope from unknown host");
            return;
        };
        if envelope.kind().is_host_addressed() {
            entry.receive_auth(envelope);
            return;
        }
        let (Some(node), Some(lane)) = (envelope.node(), envelope.lane()) else {
            return;
        };
        let node = match entry.resolve(node) {
            Ok(node) => node,
            Err(error) => {
                warn!(%error, node, "dropping envelope with invalid node uri");
                return;
            }
        };
        let route = (host.clone(), node, lane.to_string());
        let Some(&id) = self.routes.get(&route) else {
            debug!(node = %route.1, lane, tag = envelope.tag(), "no downlink for envelope");
            return;
        };
        self.dispatch(id, envelope, Instant::now());
        self.graph.recohere();
    }

    fn dispatch(&mut self, id: DownlinkId, envelope: Envelope, now: Instant) {
        let Some(downlink) = self.downlinks.get_mut(&id) else {
            return;
        };
        let Some(event) = downlink.link.receive(&envelope) else {
            return;
        };
        let observers = &mut downlink.observers;
        match event {
            LinkEvent::Linked => {
                downlink.attempts = 0;
                if downlink.link.is_syncing() {
                    downlink.model.begin_sync();
                }
                observers.each(|o| o.did_link());
            }
            LinkEvent::Event(body) => {
                observers.each(|o| o.on_event(&body));
                downlink.model.on_event(&mut self.graph, body, observers);
            }
            LinkEvent::Synced => {
                downlink.model.on_synced(&mut self.graph, observers);
                observers.each(|o| o.did_sync());
            }
            LinkEvent::Unlinked(body) => {
                debug!(id = id.0, ?body, "unlinked");
                self.lost(id, now);
            }
        }
    }

    /// Handles a link that went away: relink later or close for good.
    fn lost(&mut self, id: DownlinkId, now: Instant) {
        let policy = &self.config.reconnect;
        let Some(downlink) = self.downlinks.get_mut(&id) else {
            return;
        };
        downlink.link.reset();
        downlink.model.abort_sync();
        downlink.observers.each(|o| o.did_unlink());
        if downlink.options.keep_linked && policy.allows(downlink.attempts) {
            let delay = policy.calculate_delay(downlink.attempts);
            downlink.relink_at = Some(now + delay);
            debug!(id = id.0, attempt = downlink.attempts, ?delay, "relink scheduled");
        } else {
            self.detach(id);
        }
    }

    /// The transport to `host` dropped; every downlink on it counts as unlinked.
    pub fn disconnected(&mut self, host: &Uri) {
        let Some(entry) = self.hosts.get_mut(host) else {
            return;
        };
        entry.disconnect();
        let now = Instant::now();
        let mut ids: Vec<DownlinkId> = self
            .downlinks
            .iter()
            .filter(|(_, downlink)| downlink.host == *host)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        for id in ids {
            self.lost(id, now);
        }
        self.graph.recohere();
    }

    pub fn connected(&mut self, host: &Uri) {
        self.host_mut(host).connect();
        self.tick(Instant::now());
    }

    /// Re-issues link requests whose backoff has elapsed. Returns how many.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut relinked = 0;
        for (id, downlink) in self.downlinks.iter_mut() {
            if !downlink.relink_at.is_some_and(|at| at <= now) {
                continue;
            }
            let Some(host) = self.hosts.get_mut(&downlink.host).filter(|host| host.is_connected()) else {
                continue;
            };
            downlink.relink_at = None;
            downlink.attempts += 1;
            if let Some(request) = downlink.link.open(downlink.options.keep_synced) {
                debug!(id = id.0, attempt = downlink.attempts, "relinking");
                host.push(request);
                relinked += 1;
            }
        }
        relinked
    }

    /// Earliest pending relink, for scheduling the next `tick`.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.downlinks.values().filter_map(|downlink| downlink.relink_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downlink::ReconnectPolicy;
    use crate::streamlet::{KeyOutlet, ValueOutput};
    use crate::structure::Record;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn host() -> Uri {
        Uri::parse("warp://localhost:9001").unwrap()
    }

    fn client() -> Client {
        Client::new(ClientConfig { reconnect: ReconnectPolicy::immediate(), ..ClientConfig::default() })
    }

    /// Answers a link or sync request the way a lane would.
    fn respond(client: &mut Client, request: &Envelope, events: &[Value]) {
        let (node, lane) = (request.node().unwrap(), request.lane().unwrap());
        client.receive(&host(), Envelope::linked(node, lane));
        for event in events {
            client.receive(&host(), Envelope::event(node, lane, event.clone()));
        }
        if matches!(request, Envelope::Sync(_)) {
            client.receive(&host(), Envelope::synced(node, lane));
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<String>>>);

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.0.borrow().clone()
        }
    }

    impl DownlinkObserver for Recorder {
        fn on_event(&mut self, body: &Value) {
            self.0.borrow_mut().push(format!("event {}", body));
        }
        fn did_link(&mut self) {
            self.0.borrow_mut().push("link".into());
        }
        fn did_sync(&mut self) {
            self.0.borrow_mut().push("sync".into());
        }
        fn did_unlink(&mut self) {
            self.0.borrow_mut().push("unlink".into());
        }
        fn did_close(&mut self) {
            self.0.borrow_mut().push("close".into());
        }
        fn did_set(&mut self, value: &Value, _old: &Value) {
            self.0.borrow_mut().push(format!("set {}", value));
        }
        fn did_update(&mut self, key: &Value, value: &Value, _old: &Value) {
            self.0.borrow_mut().push(format!("update {} {}", key, value));
        }
        fn did_remove(&mut self, key: &Value, _old: &Value) {
            self.0.borrow_mut().push(format!("remove {}", key));
        }
    }

    #[test]
    fn test_value_downlink_visible_once_synced() {
        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default())
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            client
                .graph_mut()
                .insert(ValueOutput::observed(move |v: &Value| seen.borrow_mut().push(v.clone())))
        };
        client.graph_mut().bind_input(sink, 0, light.outlet());

        let request = client.poll_outgoing(&host()).unwrap();
        assert!(matches!(request, Envelope::Sync(_)));
        let (node, lane) = (request.node().unwrap().to_string(), request.lane().unwrap().to_string());
        assert_eq!(Envelope::parse(&request.to_recon()), Ok(request.clone()));

        client.receive(&host(), Envelope::linked(node.as_str(), lane.as_str()));
        assert_eq!(client.state(light.id()), Some(LinkState::Linked));
        client.receive(&host(), Envelope::event(node.as_str(), lane.as_str(), "on"));
        assert_eq!(light.get(&mut client), Value::Absent);
        assert!(!seen.borrow().contains(&Value::from("on")));

        client.receive(&host(), Envelope::synced(node.as_str(), lane.as_str()));
        assert_eq!(client.state(light.id()), Some(LinkState::Synced));
        assert_eq!(light.get(&mut client), Value::from("on"));
        assert_eq!(seen.borrow().iter().filter(|v| **v == Value::from("on")).count(), 1);
    }

    #[test]
    fn test_callbacks_and_remote_set() {
        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default())
            .unwrap();
        let recorder = Recorder::default();
        client.observe(light.id(), recorder.clone()).unwrap();
        let request = client.poll_outgoing(&host()).unwrap();
        respond(&mut client, &request, &[Value::from("off")]);
        assert_eq!(recorder.log(), vec!["link", "event off", "set off", "sync"]);

        assert_eq!(light.set(&mut client, "on"), Ok(Value::from("off")));
        let command = client.poll_outgoing(&host()).unwrap();
        assert_eq!(command, Envelope::command(request.node().unwrap(), "light", "on"));
        assert_eq!(light.get(&mut client), Value::from("on"));
    }

    #[test]
    fn test_duplicate_linked_is_ignored() {
        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default().keep_synced(false))
            .unwrap();
        let recorder = Recorder::default();
        client.observe(light.id(), recorder.clone()).unwrap();
        let request = client.poll_outgoing(&host()).unwrap();
        assert!(matches!(request, Envelope::Link(_)));
        let (node, lane) = (request.node().unwrap(), request.lane().unwrap());
        client.receive(&host(), Envelope::linked(node, lane));
        client.receive(&host(), Envelope::linked(node, lane));
        client.receive(&host(), Envelope::event(node, lane, 1));
        assert_eq!(recorder.log(), vec!["link", "event 1", "set 1"]);
        assert_eq!(client.state(light.id()), Some(LinkState::Linked));
    }

    #[test]
    fn test_duplicate_downlink_rejected() {
        let mut client = client();
        client.open_value_downlink(&host(), "/house", "light", DownlinkOptions::default()).unwrap();
        let again = client.open_value_downlink(&host(), "warp://localhost:9001/house", "light", DownlinkOptions::default());
        assert!(matches!(again, Err(DownlinkError::Duplicate { .. })));
        assert!(client.open_value_downlink(&host(), "/house", "door", DownlinkOptions::default()).is_ok());
    }

    #[test]
    fn test_relinks_after_unlinked() {
        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default())
            .unwrap();
        let request = client.poll_outgoing(&host()).unwrap();
        respond(&mut client, &request, &[Value::from("on")]);
        let (node, lane) = (request.node().unwrap(), request.lane().unwrap());

        client.receive(&host(), Envelope::unlinked(node, lane));
        assert_eq!(client.state(light.id()), Some(LinkState::Unlinked));
        assert!(client.next_timeout().is_some());
        // cached state survives until the next sync
        assert_eq!(light.get(&mut client), Value::from("on"));

        assert_eq!(client.tick(Instant::now() + Duration::from_secs(1)), 1);
        let relink = client.poll_outgoing(&host()).unwrap();
        assert_eq!(relink, request);
        respond(&mut client, &relink, &[Value::from("dim")]);
        assert_eq!(light.get(&mut client), Value::from("dim"));
        assert_eq!(client.next_timeout(), None);
    }

    #[test]
    fn test_unlinked_without_keep_linked_closes() {
        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default().keep_linked(false))
            .unwrap();
        let recorder = Recorder::default();
        client.observe(light.id(), recorder.clone()).unwrap();
        let request = client.poll_outgoing(&host()).unwrap();
        client.receive(&host(), Envelope::unlinked(request.node().unwrap(), request.lane().unwrap()));
        assert_eq!(client.state(light.id()), None);
        assert_eq!(recorder.log(), vec!["unlink", "close"]);
        assert!(!client.graph().contains(light.outlet()));
    }

    #[test]
    fn test_close_detaches_and_drops_later_envelopes() {
        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default())
            .unwrap();
        let sink = client.graph_mut().insert(ValueOutput::new());
        client.graph_mut().bind_input(sink, 0, light.outlet());
        let request = client.poll_outgoing(&host()).unwrap();
        respond(&mut client, &request, &[Value::from("on")]);
        assert_eq!(client.graph().peek(sink), Value::from("on"));

        client.close_downlink(light.id()).unwrap();
        assert_eq!(
            client.poll_outgoing(&host()),
            Some(Envelope::unlink(request.node().unwrap(), "light"))
        );
        assert_eq!(client.graph().input(sink, 0), None);
        assert_eq!(client.graph().peek(sink), Value::Absent);
        client.receive(&host(), Envelope::event(request.node().unwrap(), "light", "off"));
        assert_eq!(client.graph().peek(sink), Value::Absent);
        assert_eq!(client.close_downlink(light.id()), Err(DownlinkError::Unknown(light.id())));
    }

    #[test]
    fn test_map_downlink_updates_single_keys() {
        let mut client = client();
        let rooms = client
            .open_map_downlink(&host(), "/house", "rooms", DownlinkOptions::default())
            .unwrap();
        let kitchen = client.graph_mut().insert(KeyOutlet::new("kitchen"));
        let hall = client.graph_mut().insert(KeyOutlet::new("hall"));
        client.graph_mut().bind_input(kitchen, 0, rooms.outlet());
        client.graph_mut().bind_input(hall, 0, rooms.outlet());
        let request = client.poll_outgoing(&host()).unwrap();
        let update = |key: &str, value: i32| MapAction::Update { key: Value::from(key), value: Value::from(value) }.to_value();
        respond(&mut client, &request, &[update("kitchen", 1), update("hall", 2)]);
        assert_eq!(client.graph().peek(kitchen), Value::from(1));
        assert_eq!(client.graph().peek(hall), Value::from(2));

        let (node, lane) = (request.node().unwrap(), request.lane().unwrap());
        client.receive(&host(), Envelope::event(node, lane, update("kitchen", 5)));
        assert_eq!(client.graph().peek(kitchen), Value::from(5));
        assert!(client.graph().is_coherent(hall));

        client.receive(&host(), Envelope::event(node, lane, MapAction::Remove { key: Value::from("hall") }.to_value()));
        assert_eq!(client.graph().peek(hall), Value::Absent);
        assert_eq!(rooms.snapshot(&mut client), Value::Record(Record::new().with_slot("kitchen", 5)));

        rooms.update(&mut client, "attic", 0).unwrap();
        let command = client.poll_outgoing(&host()).unwrap();
        assert_eq!(MapAction::from_value(command.body()), Some(MapAction::Update { key: Value::from("attic"), value: Value::from(0) }));
    }

    #[test]
    fn test_list_downlink() {
        let mut client = client();
        let todo = client
            .open_list_downlink(&host(), "/house", "todo", DownlinkOptions::default())
            .unwrap();
        let request = client.poll_outgoing(&host()).unwrap();
        let insert = |index: usize, value: &str| ListAction::Insert { index, value: Value::from(value) }.to_value();
        respond(&mut client, &request, &[insert(0, "milk"), insert(1, "eggs")]);
        assert_eq!(todo.len(&client), 2);
        todo.push(&mut client, "bread").unwrap();
        todo.remove(&mut client, 0).unwrap();
        assert_eq!(
            todo.get(&mut client),
            Value::Record(Record::of([Value::from("eggs").into(), Value::from("bread").into()]))
        );
    }

    #[test]
    fn test_list_event_decoheres_one_index() {
        let mut client = client();
        let todo = client
            .open_list_downlink(&host(), "/house", "todo", DownlinkOptions::default())
            .unwrap();
        let first = client.graph_mut().insert(KeyOutlet::new(0));
        let second = client.graph_mut().insert(KeyOutlet::new(1));
        client.graph_mut().bind_input(first, 0, todo.outlet());
        client.graph_mut().bind_input(second, 0, todo.outlet());
        let request = client.poll_outgoing(&host()).unwrap();
        let insert = |index: usize, value: &str| ListAction::Insert { index, value: Value::from(value) }.to_value();
        respond(&mut client, &request, &[insert(0, "milk"), insert(1, "eggs")]);
        assert_eq!(client.graph().peek(second), Value::from("eggs"));

        let update = ListAction::Update { index: 1, value: Value::from("ham") }.to_value();
        let (node, lane) = (request.node().unwrap(), request.lane().unwrap());
        client.receive(&host(), Envelope::event(node, lane, update));
        assert!(client.graph().is_coherent(first));
        assert_eq!(client.graph().peek(first), Value::from("milk"));
        assert_eq!(client.graph().peek(second), Value::from("ham"));
        assert_eq!(todo.get_index(&mut client, 1), Value::from("ham"));
    }

    #[test]
    fn test_list_resync_reports_differences_at_synced() {
        let mut client = client();
        let todo = client
            .open_list_downlink(&host(), "/house", "todo", DownlinkOptions::default())
            .unwrap();
        let recorder = Recorder::default();
        client.observe(todo.id(), recorder.clone()).unwrap();
        let request = client.poll_outgoing(&host()).unwrap();
        let insert = |index: usize, value: &str| ListAction::Insert { index, value: Value::from(value) }.to_value();
        respond(&mut client, &request, &[insert(0, "a"), insert(1, "b"), insert(2, "c")]);
        assert_eq!(todo.len(&client), 3);

        let (node, lane) = (request.node().unwrap(), request.lane().unwrap());
        client.receive(&host(), Envelope::unlinked(node, lane));
        assert_eq!(client.tick(Instant::now() + Duration::from_secs(1)), 1);
        let relink = client.poll_outgoing(&host()).unwrap();
        recorder.0.borrow_mut().clear();

        client.receive(&host(), Envelope::linked(node, lane));
        client.receive(&host(), Envelope::event(node, lane, insert(0, "a")));
        client.receive(&host(), Envelope::event(node, lane, insert(1, "x")));
        assert!(!recorder.log().iter().any(|line| line.starts_with("update") || line.starts_with("remove")));
        assert_eq!(todo.len(&client), 3);

        assert_eq!(relink, request);
        client.receive(&host(), Envelope::synced(node, lane));
        let log = recorder.log();
        assert!(log.contains(&"update 1 x".to_string()), "{:?}", log);
        assert!(log.contains(&"remove 2".to_string()), "{:?}", log);
        assert!(!log.iter().any(|line| line.starts_with("update 0")), "{:?}", log);
        assert_eq!(log.last().map(String::as_str), Some("sync"));
        assert_eq!(
            todo.get(&mut client),
            Value::Record(Record::of([Value::from("a").into(), Value::from("x").into()]))
        );
    }

    #[test]
    fn test_transport_failure_schedules_relink() {
        struct Broken;
        impl Transport for Broken {
            fn send(&mut self, _host: &Uri, _envelope: &str) -> anyhow::Result<()> {
                anyhow::bail!("connection reset")
            }
        }
        struct Wire(Vec<String>);
        impl Transport for Wire {
            fn send(&mut self, _host: &Uri, envelope: &str) -> anyhow::Result<()> {
                self.0.push(envelope.to_string());
                Ok(())
            }
        }

        let mut client = client();
        let light = client
            .open_value_downlink(&host(), "/house", "light", DownlinkOptions::default())
            .unwrap();
        assert!(matches!(client.flush(&mut Broken), Err(TransportError::Send { .. })));
        assert!(!client.host(&host()).unwrap().is_connected());
        assert_eq!(client.state(light.id()), Some(LinkState::Unlinked));

        client.connected(&host());
        let mut wire = Wire(Vec::new());
        assert_eq!(client.flush(&mut wire).unwrap(), 1);
        assert!(wire.0[0].starts_with("@sync("));
    }

    #[test]
    fn test_auth_is_connection_scoped() {
        let mut client = client();
        client.authenticate(&host(), Record::new().with_slot("token", "s3cret"));
        assert_eq!(client.auth_state(&host()), Some(&AuthState::Authenticating));
        assert!(matches!(client.poll_outgoing(&host()), Some(Envelope::Auth(_))));
        client.receive(&host(), Envelope::authed(Value::Absent));
        assert_eq!(client.auth_state(&host()), Some(&AuthState::Authenticated(Value::Absent)));

        client.disconnected(&host());
        client.connected(&host());
        assert!(matches!(client.poll_outgoing(&host()), Some(Envelope::Auth(_))));

        client.deauthenticate(&host(), Value::Absent);
        assert_eq!(client.poll_outgoing(&host()), Some(Envelope::deauth(Value::Absent)));
        client.receive(&host(), Envelope::deauthed(Value::Absent));
        assert_eq!(client.auth_state(&host()), Some(&AuthState::Deauthenticated(Value::Absent)));
    }

    #[test]
    fn test_command_without_downlink() {
        let mut client = client();
        client.command(&host(), "warp://localhost:9001/house", "light", "toggle").unwrap();
        let command = client.poll_outgoing(&host()).unwrap();
        assert_eq!(command.lane(), Some("light"));
        assert_eq!(command.body(), &Value::from("toggle"));
        assert!(!command.node().unwrap().starts_with("warp:"));
    }
}
