use tracing::{trace, warn};

use super::envelope::{Envelope, EnvelopeKind};
use crate::structure::Value;

bitflags::bitflags! {
    /// Link lifecycle bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinkStatus: u8 {
        const LINKING = 1 << 0;
        const LINKED = 1 << 1;
        const SYNCING = 1 << 2;
        const SYNCED = 1 << 3;
        const UNLINKING = 1 << 4;
    }
}

/// Coarse view of a link's status
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    Linking,
    Linked,
    Synced,
    Unlinking,
}

/// What an inbound envelope meant for a link.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Linked,
    Synced,
    Event(Value),
    Unlinked(Value),
}

/// Client half of one WARP link, driven by inbound envelopes.
#[derive(Clone, Debug)]
pub struct Link {
    node: String,
    lane: String,
    status: LinkStatus,
    prio: f64,
    rate: f64,
}

impl Link {
    pub fn new(node: impl Into<String>, lane: impl Into<String>) -> Self {
        Link { node: node.into(), lane: lane.into(), status: LinkStatus::empty(), prio: 0.0, rate: 0.0 }
    }

    pub fn with_prio(mut self, prio: f64, rate: f64) -> Self {
        self.prio = prio;
        self.rate = rate;
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn state(&self) -> LinkState {
        let s = self.status;
        if s.contains(LinkStatus::UNLINKING) {
            LinkState::Unlinking
        } else if s.contains(LinkStatus::SYNCED) {
            LinkState::Synced
        } else if s.contains(LinkStatus::LINKED) {
            LinkState::Linked
        } else if s.contains(LinkStatus::LINKING) {
            LinkState::Linking
        } else {
            LinkState::Unlinked
        }
    }

    pub fn is_linked(&self) -> bool {
        self.status.contains(LinkStatus::LINKED)
    }

    pub fn is_synced(&self) -> bool {
        self.status.contains(LinkStatus::SYNCED)
    }

    /// A sync was requested and the synced response has not yet arrived.
    pub fn is_syncing(&self) -> bool {
        self.status.contains(LinkStatus::SYNCING)
    }

    /// Starts linking from the unlinked state, returning the request to send.
    pub fn open(&mut self, sync: bool) -> Option<Envelope> {
        if !self.status.is_empty() {
            warn!(node = %self.node, lane = %self.lane, status = ?self.status, "link already open");
            return None;
        }
        let request = if sync {
            self.status = LinkStatus::LINKING | LinkStatus::SYNCING;
            Envelope::sync(self.node.as_str(), self.lane.as_str())
        } else {
            self.status = LinkStatus::LINKING;
            Envelope::link(self.node.as_str(), self.lane.as_str())
        };
        Some(request.with_prio(self.prio, self.rate))
    }

    /// Starts unlinking, returning the request to send if the link was open.
    pub fn close(&mut self) -> Option<Envelope> {
        if self.status.is_empty() || self.status.contains(LinkStatus::UNLINKING) {
            return None;
        }
        self.status.insert(LinkStatus::UNLINKING);
        Some(Envelope::unlink(self.node.as_str(), self.lane.as_str()))
    }

    /// Forces the link back to unlinked, as when the transport drops.
    pub fn reset(&mut self) {
        self.status = LinkStatus::empty();
    }

    /// Applies an inbound envelope; protocol violations are logged and ignored.
    pub fn receive(&mut self, envelope: &Envelope) -> Option<LinkEvent> {
        let kind = envelope.kind();
        match kind {
            EnvelopeKind::Linked => {
                if !self.status.contains(LinkStatus::LINKING) {
                    return self.violation(kind);
                }
                self.status.remove(LinkStatus::LINKING);
                self.status.insert(LinkStatus::LINKED);
                Some(LinkEvent::Linked)
            }
            EnvelopeKind::Synced => {
                if !self.status.contains(LinkStatus::LINKED | LinkStatus::SYNCING) {
                    return self.violation(kind);
                }
                self.status.remove(LinkStatus::SYNCING);
                self.status.insert(LinkStatus::SYNCED);
                Some(LinkEvent::Synced)
            }
            EnvelopeKind::Event => {
                if !self.status.contains(LinkStatus::LINKED) {
                    return self.violation(kind);
                }
                Some(LinkEvent::Event(envelope.body().clone()))
            }
            EnvelopeKind::Unlinked => {
                self.status = LinkStatus::empty();
                Some(LinkEvent::Unlinked(envelope.body().clone()))
            }
            _ => {
                trace!(tag = kind.tag(), "envelope not addressed to a link");
                None
            }
        }
    }

    fn violation(&self, kind: EnvelopeKind) -> Option<LinkEvent> {
        warn!(
            node = %self.node,
            lane = %self.lane,
            tag = kind.tag(),
            status = ?self.status,
            "protocol violation: envelope out of order"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_lifecycle() {
        let mut link = Link::new("/house", "light");
        assert_eq!(link.state(), LinkState::Unlinked);
        assert_eq!(link.open(true), Some(Envelope::sync("/house", "light")));
        assert_eq!(link.state(), LinkState::Linking);
        assert_eq!(link.receive(&Envelope::linked("/house", "light")), Some(LinkEvent::Linked));
        assert_eq!(link.state(), LinkState::Linked);
        assert!(link.is_syncing());
        assert_eq!(
            link.receive(&Envelope::event("/house", "light", "on")),
            Some(LinkEvent::Event(Value::from("on")))
        );
        assert_eq!(link.receive(&Envelope::synced("/house", "light")), Some(LinkEvent::Synced));
        assert_eq!(link.state(), LinkState::Synced);
        assert_eq!(link.close(), Some(Envelope::unlink("/house", "light")));
        assert_eq!(link.state(), LinkState::Unlinking);
        assert_eq!(link.close(), None);
        assert!(matches!(link.receive(&Envelope::unlinked("/house", "light")), Some(LinkEvent::Unlinked(_))));
        assert_eq!(link.state(), LinkState::Unlinked);
    }

    #[test]
    fn test_violations_are_ignored() {
        let mut link = Link::new("/house", "light");
        assert_eq!(link.receive(&Envelope::event("/house", "light", 1)), None);
        assert_eq!(link.receive(&Envelope::synced("/house", "light")), None);
        link.open(false);
        assert_eq!(link.receive(&Envelope::linked("/house", "light")), Some(LinkEvent::Linked));
        assert_eq!(link.receive(&Envelope::linked("/house", "light")), None);
        // no sync was requested
        assert_eq!(link.receive(&Envelope::synced("/house", "light")), None);
        assert_eq!(link.state(), LinkState::Linked);
    }

    #[test]
    fn test_unlinked_forces_reset_from_any_state() {
        let mut link = Link::new("n", "l");
        link.open(true);
        assert!(link.receive(&Envelope::unlinked("n", "l")).is_some());
        assert_eq!(link.status(), LinkStatus::empty());
        assert!(link.open(false).is_some());
        assert!(link.open(false).is_none());
        link.reset();
        assert_eq!(link.state(), LinkState::Unlinked);
    }

    #[test]
    fn test_open_carries_prio() {
        let mut link = Link::new("n", "l").with_prio(0.5, 2.0);
        assert_eq!(link.open(false), Some(Envelope::link("n", "l").with_prio(0.5, 2.0)));
    }
}
