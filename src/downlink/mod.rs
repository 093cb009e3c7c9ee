//! Downlinks: client-side mirrors of remote lanes.
//!
//! A [`Client`] tracks hosts and the downlinks opened against them. Each
//! downlink drives one [`Link`](crate::warp::Link), buffers state received
//! during a sync, and publishes it into the client's dataflow graph once the
//! lane reports `@synced`. Lost links relink with exponential backoff.

mod client;
mod config;
mod error;
mod host;
mod list;
mod map;
mod observer;
mod value;

pub use client::{Client, DownlinkId, Transport};
pub use config::{ClientConfig, ConfigError, DownlinkOptions, ReconnectPolicy};
pub use error::{DownlinkError, TransportError};
pub use host::{AuthState, Host};
pub use list::{ListAction, ListDownlink};
pub use map::{MapAction, MapDownlink};
pub use observer::DownlinkObserver;
pub use value::ValueDownlink;
