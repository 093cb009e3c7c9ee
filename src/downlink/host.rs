use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::structure::Value;
use crate::uri::{Uri, UriCache, UriError};
use crate::warp::Envelope;

/// Connection-scoped authentication state.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated(Value),
    Deauthenticated(Value),
}

/// One remote endpoint: its outbound queue, uri cache and auth state.
#[derive(Debug)]
pub struct Host {
    uri: Uri,
    cache: UriCache,
    outbox: VecDeque<Envelope>,
    auth: AuthState,
    credentials: Option<Value>,
    connected: bool,
}

impl Host {
    pub(crate) fn new(uri: Uri, cache_size: usize) -> Self {
        Host {
            cache: UriCache::new(uri.clone(), cache_size),
            uri,
            outbox: VecDeque::new(),
            auth: AuthState::Unauthenticated,
            credentials: None,
            connected: true,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Envelopes waiting to be sent.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub(crate) fn push(&mut self, envelope: Envelope) {
        self.outbox.push_back(envelope);
    }

    pub(crate) fn pop(&mut self) -> Option<Envelope> {
        self.outbox.pop_front()
    }

    pub(crate) fn push_front(&mut self, envelope: Envelope) {
        self.outbox.push_front(envelope);
    }

    /// Absolute form of a node uri as written on the wire.
    pub(crate) fn resolve(&mut self, node: &str) -> Result<Uri, UriError> {
        self.cache.resolve(node)
    }

    /// Shortest form of `node` relative to this host.
    pub(crate) fn unresolve(&mut self, node: &Uri) -> String {
        self.cache.unresolve(node)
    }

    pub(crate) fn authenticate(&mut self, credentials: Value) {
        self.auth = AuthState::Authenticating;
        self.credentials = Some(credentials.clone());
        self.push(Envelope::auth(credentials));
    }

    pub(crate) fn deauthenticate(&mut self, body: Value) {
        self.credentials = None;
        self.push(Envelope::deauth(body));
    }

    pub(crate) fn receive_auth(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Authed(h) => {
                debug!(host = %self.uri, "authenticated");
                self.auth = AuthState::Authenticated(h.body);
            }
            Envelope::Deauthed(h) => {
                debug!(host = %self.uri, "deauthenticated");
                self.credentials = None;
                self.auth = AuthState::Deauthenticated(h.body);
            }
            other => warn!(host = %self.uri, tag = other.tag(), "unexpected host envelope"),
        }
    }

    /// Drops queued envelopes; they are re-issued when links reopen.
    pub(crate) fn disconnect(&mut self) {
        self.connected = false;
        self.outbox.clear();
        self.auth = AuthState::Unauthenticated;
    }

    /// Marks the host connected, queueing re-authentication first.
    pub(crate) fn connect(&mut self) {
        self.connected = true;
        if let Some(credentials) = self.credentials.clone() {
            self.auth = AuthState::Authenticating;
            self.push_front(Envelope::auth(credentials));
        }
    }
}
