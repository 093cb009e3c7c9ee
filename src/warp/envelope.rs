use std::fmt;

use thiserror::Error;

use crate::codec::Diagnostic;
use crate::recon;
use crate::structure::{Field, Item, Record, Value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("malformed recon: {0}")]
    Parse(#[from] Diagnostic),
    #[error("not an envelope: expected a record led by an attribute")]
    NotAnEnvelope,
    #[error("unknown envelope tag @{0}")]
    UnknownTag(String),
    #[error("@{0} envelope is missing its node uri")]
    MissingNode(&'static str),
    #[error("@{0} envelope is missing its lane uri")]
    MissingLane(&'static str),
    #[error("@{tag} header field {field} must be {expected}")]
    InvalidHeader { tag: &'static str, field: &'static str, expected: &'static str },
}

/// Envelope kinds, one per reserved Recon tag
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Link,
    Sync,
    Linked,
    Synced,
    Unlink,
    Unlinked,
    Event,
    Command,
    Auth,
    Authed,
    Deauth,
    Deauthed,
}

impl EnvelopeKind {
    pub fn tag(self) -> &'static str {
        match self {
            EnvelopeKind::Link => "link",
            EnvelopeKind::Sync => "sync",
            EnvelopeKind::Linked => "linked",
            EnvelopeKind::Synced => "synced",
            EnvelopeKind::Unlink => "unlink",
            EnvelopeKind::Unlinked => "unlinked",
            EnvelopeKind::Event => "event",
            EnvelopeKind::Command => "command",
            EnvelopeKind::Auth => "auth",
            EnvelopeKind::Authed => "authed",
            EnvelopeKind::Deauth => "deauth",
            EnvelopeKind::Deauthed => "deauthed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "link" => Some(EnvelopeKind::Link),
            "sync" => Some(EnvelopeKind::Sync),
            "linked" => Some(EnvelopeKind::Linked),
            "synced" => Some(EnvelopeKind::Synced),
            "unlink" => Some(EnvelopeKind::Unlink),
            "unlinked" => Some(EnvelopeKind::Unlinked),
            "event" => Some(EnvelopeKind::Event),
            "command" => Some(EnvelopeKind::Command),
            "auth" => Some(EnvelopeKind::Auth),
            "authed" => Some(EnvelopeKind::Authed),
            "deauth" => Some(EnvelopeKind::Deauth),
            "deauthed" => Some(EnvelopeKind::Deauthed),
            _ => None,
        }
    }

    /// Carries `prio` and `rate` in its header.
    pub fn is_link_addressed(self) -> bool {
        matches!(self, EnvelopeKind::Link | EnvelopeKind::Sync | EnvelopeKind::Linked)
    }

    /// Scoped to the connection rather than to a link.
    pub fn is_host_addressed(self) -> bool {
        matches!(
            self,
            EnvelopeKind::Auth | EnvelopeKind::Authed | EnvelopeKind::Deauth | EnvelopeKind::Deauthed
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Header of an envelope that targets a lane.
#[derive(Clone, Debug, PartialEq)]
pub struct LaneAddressed {
    pub node: String,
    pub lane: String,
    pub body: Value,
}

/// Header of a link-establishing envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkAddressed {
    pub node: String,
    pub lane: String,
    pub prio: f64,
    pub rate: f64,
    pub body: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HostAddressed {
    pub body: Value,
}

/// One WARP protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Link(LinkAddressed),
    Sync(LinkAddressed),
    Linked(LinkAddressed),
    Synced(LaneAddressed),
    Unlink(LaneAddressed),
    Unlinked(LaneAddressed),
    Event(LaneAddressed),
    Command(LaneAddressed),
    Auth(HostAddressed),
    Authed(HostAddressed),
    Deauth(HostAddressed),
    Deauthed(HostAddressed),
}

fn link(node: impl Into<String>, lane: impl Into<String>) -> LinkAddressed {
    LinkAddressed { node: node.into(), lane: lane.into(), prio: 0.0, rate: 0.0, body: Value::Absent }
}

fn lane(node: impl Into<String>, lane: impl Into<String>, body: Value) -> LaneAddressed {
    LaneAddressed { node: node.into(), lane: lane.into(), body }
}

impl Envelope {
    pub fn link(node: impl Into<String>, lane: impl Into<String>) -> Self {
        Envelope::Link(link(node, lane))
    }

    pub fn sync(node: impl Into<String>, lane: impl Into<String>) -> Self {
        Envelope::Sync(link(node, lane))
    }

    pub fn linked(node: impl Into<String>, lane: impl Into<String>) -> Self {
        Envelope::Linked(link(node, lane))
    }

    pub fn synced(node: impl Into<String>, lane_uri: impl Into<String>) -> Self {
        Envelope::Synced(lane(node, lane_uri, Value::Absent))
    }

    pub fn unlink(node: impl Into<String>, lane_uri: impl Into<String>) -> Self {
        Envelope::Unlink(lane(node, lane_uri, Value::Absent))
    }

    pub fn unlinked(node: impl Into<String>, lane_uri: impl Into<String>) -> Self {
        Envelope::Unlinked(lane(node, lane_uri, Value::Absent))
    }

    pub fn event(node: impl Into<String>, lane_uri: impl Into<String>, body: impl Into<Value>) -> Self {
        Envelope::Event(lane(node, lane_uri, body.into()))
    }

    pub fn command(node: impl Into<String>, lane_uri: impl Into<String>, body: impl Into<Value>) -> Self {
        Envelope::Command(lane(node, lane_uri, body.into()))
    }

    pub fn auth(body: impl Into<Value>) -> Self {
        Envelope::Auth(HostAddressed { body: body.into() })
    }

    pub fn authed(body: impl Into<Value>) -> Self {
        Envelope::Authed(HostAddressed { body: body.into() })
    }

    pub fn deauth(body: impl Into<Value>) -> Self {
        Envelope::Deauth(HostAddressed { body: body.into() })
    }

    pub fn deauthed(body: impl Into<Value>) -> Self {
        Envelope::Deauthed(HostAddressed { body: body.into() })
    }

    /// Sets priority and rate; ignored by envelopes that carry neither.
    pub fn with_prio(mut self, prio: f64, rate: f64) -> Self {
        if let Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) = &mut self {
            h.prio = prio;
            h.rate = rate;
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        *self.body_mut() = body.into();
        self
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Link(_) => EnvelopeKind::Link,
            Envelope::Sync(_) => EnvelopeKind::Sync,
            Envelope::Linked(_) => EnvelopeKind::Linked,
            Envelope::Synced(_) => EnvelopeKind::Synced,
            Envelope::Unlink(_) => EnvelopeKind::Unlink,
            Envelope::Unlinked(_) => EnvelopeKind::Unlinked,
            Envelope::Event(_) => EnvelopeKind::Event,
            Envelope::Command(_) => EnvelopeKind::Command,
            Envelope::Auth(_) => EnvelopeKind::Auth,
            Envelope::Authed(_) => EnvelopeKind::Authed,
            Envelope::Deauth(_) => EnvelopeKind::Deauth,
            Envelope::Deauthed(_) => EnvelopeKind::Deauthed,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind().tag()
    }

    pub fn node(&self) -> Option<&str> {
        match self {
            Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) => Some(&h.node),
            Envelope::Synced(h)
            | Envelope::Unlink(h)
            | Envelope::Unlinked(h)
            | Envelope::Event(h)
            | Envelope::Command(h) => Some(&h.node),
            _ => None,
        }
    }

    pub fn lane(&self) -> Option<&str> {
        match self {
            Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) => Some(&h.lane),
            Envelope::Synced(h)
            | Envelope::Unlink(h)
            | Envelope::Unlinked(h)
            | Envelope::Event(h)
            | Envelope::Command(h) => Some(&h.lane),
            _ => None,
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) => &h.body,
            Envelope::Synced(h)
            | Envelope::Unlink(h)
            | Envelope::Unlinked(h)
            | Envelope::Event(h)
            | Envelope::Command(h) => &h.body,
            Envelope::Auth(h) | Envelope::Authed(h) | Envelope::Deauth(h) | Envelope::Deauthed(h) => &h.body,
        }
    }

    fn body_mut(&mut self) -> &mut Value {
        match self {
            Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) => &mut h.body,
            Envelope::Synced(h)
            | Envelope::Unlink(h)
            | Envelope::Unlinked(h)
            | Envelope::Event(h)
            | Envelope::Command(h) => &mut h.body,
            Envelope::Auth(h) | Envelope::Authed(h) | Envelope::Deauth(h) | Envelope::Deauthed(h) => &mut h.body,
        }
    }

    /// Same envelope addressed to another node, as when the node uri is
    /// rewritten between its relative wire form and its absolute form.
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        match &mut self {
            Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) => h.node = node.into(),
            Envelope::Synced(h)
            | Envelope::Unlink(h)
            | Envelope::Unlinked(h)
            | Envelope::Event(h)
            | Envelope::Command(h) => h.node = node.into(),
            _ => {}
        }
        self
    }

    /// Encodes as `@tag(header) body`.
    pub fn to_value(&self) -> Value {
        let header = match self {
            Envelope::Link(h) | Envelope::Sync(h) | Envelope::Linked(h) => {
                let mut header = Record::new().with_slot("node", h.node.as_str()).with_slot("lane", h.lane.as_str());
                if h.prio != 0.0 {
                    header.push(Item::slot("prio", h.prio));
                }
                if h.rate != 0.0 {
                    header.push(Item::slot("rate", h.rate));
                }
                Value::Record(header)
            }
            Envelope::Synced(h)
            | Envelope::Unlink(h)
            | Envelope::Unlinked(h)
            | Envelope::Event(h)
            | Envelope::Command(h) => {
                Value::Record(Record::new().with_slot("node", h.node.as_str()).with_slot("lane", h.lane.as_str()))
            }
            _ => Value::Extant,
        };
        let mut record = Record::new().with_attr(self.tag(), header);
        record.push_body(self.body());
        Value::Record(record)
    }

    pub fn from_value(value: &Value) -> Result<Envelope, EnvelopeError> {
        let record = value.as_record().ok_or(EnvelopeError::NotAnEnvelope)?;
        let tag = record.tag().ok_or(EnvelopeError::NotAnEnvelope)?;
        let kind = EnvelopeKind::from_tag(tag).ok_or_else(|| EnvelopeError::UnknownTag(tag.to_string()))?;
        let body = record.body();
        if kind.is_host_addressed() {
            let host = HostAddressed { body };
            return Ok(match kind {
                EnvelopeKind::Auth => Envelope::Auth(host),
                EnvelopeKind::Authed => Envelope::Authed(host),
                EnvelopeKind::Deauth => Envelope::Deauth(host),
                _ => Envelope::Deauthed(host),
            });
        }
        let header = Header::decode(kind.tag(), record.header())?;
        if kind.is_link_addressed() {
            let h = LinkAddressed { node: header.node, lane: header.lane, prio: header.prio, rate: header.rate, body };
            return Ok(match kind {
                EnvelopeKind::Link => Envelope::Link(h),
                EnvelopeKind::Sync => Envelope::Sync(h),
                _ => Envelope::Linked(h),
            });
        }
        let h = LaneAddressed { node: header.node, lane: header.lane, body };
        Ok(match kind {
            EnvelopeKind::Synced => Envelope::Synced(h),
            EnvelopeKind::Unlink => Envelope::Unlink(h),
            EnvelopeKind::Unlinked => Envelope::Unlinked(h),
            EnvelopeKind::Event => Envelope::Event(h),
            _ => Envelope::Command(h),
        })
    }

    pub fn parse(text: &str) -> Result<Envelope, EnvelopeError> {
        Envelope::from_value(&recon::parse(text)?)
    }

    pub fn to_recon(&self) -> String {
        recon::write(&self.to_value())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_recon())
    }
}

/// Lane header fields, accepted keyed (`node:`, `lane:`) or positional.
struct Header {
    node: String,
    lane: String,
    prio: f64,
    rate: f64,
}

impl Header {
    fn decode(tag: &'static str, header: &Value) -> Result<Header, EnvelopeError> {
        let mut node = None;
        let mut lane = None;
        let mut prio = 0.0;
        let mut rate = 0.0;
        let text = |field: &'static str, v: &Value| {
            v.as_text().map(str::to_string).ok_or(EnvelopeError::InvalidHeader {
                tag,
                field,
                expected: "text",
            })
        };
        let number = |field: &'static str, v: &Value| {
            v.as_f64().ok_or(EnvelopeError::InvalidHeader { tag, field, expected: "a number" })
        };
        let items: Vec<Item> = match header {
            Value::Record(r) => r.items().to_vec(),
            Value::Absent | Value::Extant => Vec::new(),
            single => vec![Item::Value(single.clone())],
        };
        let mut position = 0;
        for item in &items {
            match item {
                Item::Field(Field::Slot(key, value)) => match key.as_text() {
                    Some("node") => node = Some(text("node", value)?),
                    Some("lane") => lane = Some(text("lane", value)?),
                    Some("prio") => prio = number("prio", value)?,
                    Some("rate") => rate = number("rate", value)?,
                    _ => {}
                },
                Item::Value(value) => {
                    match position {
                        0 => node = Some(text("node", value)?),
                        1 => lane = Some(text("lane", value)?),
                        _ => {}
                    }
                    position += 1;
                }
                Item::Field(Field::Attr(..)) => {}
            }
        }
        Ok(Header {
            node: node.ok_or(EnvelopeError::MissingNode(tag))?,
            lane: lane.ok_or(EnvelopeError::MissingLane(tag))?,
            prio,
            rate,
        })
    }
}
