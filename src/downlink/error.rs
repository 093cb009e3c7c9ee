use thiserror::Error;

use super::client::DownlinkId;
use crate::uri::UriError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DownlinkError {
    #[error("invalid uri: {0}")]
    Uri(#[from] UriError),
    #[error("a downlink to {node} {lane} on {host} is already open")]
    Duplicate { host: String, node: String, lane: String },
    #[error("no open downlink {0:?}")]
    Unknown(DownlinkId),
    #[error("downlink {0:?} is not a {1} downlink")]
    WrongKind(DownlinkId, &'static str),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to {host} failed: {source}")]
    Send {
        host: String,
        #[source]
        source: anyhow::Error,
    },
}
