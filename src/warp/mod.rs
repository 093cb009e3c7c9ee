//! WARP wire protocol: envelopes and the per-link state machine.

mod envelope;
mod link;

pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, HostAddressed, LaneAddressed, LinkAddressed};
pub use link::{Link, LinkEvent, LinkState, LinkStatus};
