//! WARP streaming protocol stack.
//!
//! Layered bottom up:
//! - [`structure`]: the self-describing value model
//! - [`codec`] and [`recon`]: incremental parsing and writing, and the Recon notation
//! - [`uri`]: node addressing and resolution
//! - [`warp`]: envelopes and the link state machine
//! - [`streamlet`]: incremental dataflow over values
//! - [`downlink`]: a sans-io client mirroring remote lanes into the dataflow graph

pub mod codec;
pub mod downlink;
pub mod recon;
pub mod streamlet;
pub mod structure;
pub mod uri;
pub mod warp;

pub use downlink::{Client, ClientConfig, DownlinkOptions, Transport};
pub use structure::{Item, Record, Value};
pub use uri::Uri;
pub use warp::{Envelope, EnvelopeKind};
