//! Transport seams and the link slots that expose live connections.
//!
//! The routing engine never talks to a concrete client. It goes through the
//! [`LocalBus`]/[`LocalConnection`] and [`CloudConnector`]/[`CloudSession`]
//! traits, and finds the current connection through a link slot written only
//! by the loop that owns it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use classhub_common::{CloudValue, VariableType};

use crate::config::Account;
use crate::error::TransportError;

/// A message received on the local bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl LocalMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Event stream of a local connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Message(LocalMessage),
    /// The connection was lost; no more events follow.
    Disconnected(String),
}

/// A write issued by the cloud on one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudWrite {
    pub variable: String,
    pub value: CloudValue,
}

/// Factory for local bus connections.
#[async_trait]
pub trait LocalBus: Send + Sync {
    /// Connect to the bus. Returning `Ok` is the on-connected signal.
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn LocalConnection>, mpsc::Receiver<LocalEvent>), TransportError>;
}

/// A live local bus connection. Subscriptions end with the connection.
#[async_trait]
pub trait LocalConnection: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish a payload. Safe to call concurrently.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn close(&self);
}

/// Opens cloud sessions for accounts.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn CloudSession>, TransportError>;
}

/// A cloud session for one account.
#[async_trait]
pub trait CloudSession: Send + Sync {
    /// Declare a variable before [`run`](Self::run). Only writable variables
    /// receive cloud writes.
    async fn register_variable(
        &self,
        name: &str,
        var_type: VariableType,
        writable: bool,
    ) -> Result<(), TransportError>;

    /// Serve the session until it ends, forwarding cloud writes to `writes`.
    async fn run(&self, writes: mpsc::Sender<CloudWrite>) -> Result<(), TransportError>;

    /// Ask a running session to end.
    async fn stop(&self);

    /// Push a new value for a variable.
    async fn set_variable(&self, name: &str, value: &CloudValue) -> Result<(), TransportError>;
}

/// Lifecycle of a cloud session, as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Running,
    Faulted,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Running => "running",
            SessionState::Faulted => "faulted",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the local bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

impl std::fmt::Display for LocalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LocalState::Disconnected => "disconnected",
            LocalState::Connecting => "connecting",
            LocalState::Connected => "connected",
            LocalState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct AccountSlot {
    state: SessionState,
    session: Option<Arc<dyn CloudSession>>,
}

/// Current session of one account.
pub struct AccountLink {
    account: String,
    slot: RwLock<AccountSlot>,
}

impl AccountLink {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            slot: RwLock::new(AccountSlot {
                state: SessionState::Idle,
                session: None,
            }),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn state(&self) -> SessionState {
        self.slot.read().state
    }

    /// The session, while it is running.
    pub fn session(&self) -> Option<Arc<dyn CloudSession>> {
        let slot = self.slot.read();
        match slot.state {
            SessionState::Running => slot.session.clone(),
            _ => None,
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.slot.write().state = state;
    }

    /// Publish a running session.
    pub(crate) fn attach(&self, session: Arc<dyn CloudSession>) {
        let mut slot = self.slot.write();
        slot.session = Some(session);
        slot.state = SessionState::Running;
    }

    /// Withdraw the session and mark the link faulted.
    pub(crate) fn detach(&self) -> Option<Arc<dyn CloudSession>> {
        let mut slot = self.slot.write();
        slot.state = SessionState::Faulted;
        slot.session.take()
    }
}

impl std::fmt::Debug for AccountLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLink")
            .field("account", &self.account)
            .field("state", &self.state())
            .finish()
    }
}

/// One link per enabled account. The set itself never changes.
#[derive(Debug, Default)]
pub struct CloudLinks {
    links: BTreeMap<String, Arc<AccountLink>>,
}

impl CloudLinks {
    pub fn new<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let links = accounts
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), Arc::new(AccountLink::new(name)))
            })
            .collect();
        Self { links }
    }

    pub fn get(&self, account: &str) -> Option<&Arc<AccountLink>> {
        self.links.get(account)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AccountLink>> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Snapshot of every account's state.
    pub fn states(&self) -> BTreeMap<String, SessionState> {
        self.links
            .iter()
            .map(|(name, link)| (name.clone(), link.state()))
            .collect()
    }
}

struct LocalSlot {
    state: LocalState,
    connection: Option<Arc<dyn LocalConnection>>,
}

/// Current local bus connection.
pub struct LocalLink {
    slot: RwLock<LocalSlot>,
}

impl Default for LocalLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLink {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(LocalSlot {
                state: LocalState::Disconnected,
                connection: None,
            }),
        }
    }

    pub fn state(&self) -> LocalState {
        self.slot.read().state
    }

    /// The connection, while it is up.
    pub fn connection(&self) -> Option<Arc<dyn LocalConnection>> {
        let slot = self.slot.read();
        match (&slot.state, &slot.connection) {
            (LocalState::Connected, Some(conn)) if conn.is_connected() => Some(conn.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_state(&self, state: LocalState) {
        self.slot.write().state = state;
    }

    pub(crate) fn attach(&self, connection: Arc<dyn LocalConnection>) {
        let mut slot = self.slot.write();
        slot.connection = Some(connection);
        slot.state = LocalState::Connected;
    }

    pub(crate) fn detach(&self) -> Option<Arc<dyn LocalConnection>> {
        let mut slot = self.slot.write();
        slot.state = LocalState::Disconnected;
        slot.connection.take()
    }
}

impl std::fmt::Debug for LocalLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLink")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSession;

    #[async_trait]
    impl CloudSession for NullSession {
        async fn register_variable(
            &self,
            _name: &str,
            _var_type: VariableType,
            _writable: bool,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn run(&self, _writes: mpsc::Sender<CloudWrite>) -> Result<(), TransportError> {
            Ok(())
        }

        async fn stop(&self) {}

        async fn set_variable(
            &self,
            _name: &str,
            _value: &CloudValue,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_account_link_lifecycle() {
        let link = AccountLink::new("room1");
        assert_eq!(link.state(), SessionState::Idle);
        assert!(link.session().is_none());

        link.attach(Arc::new(NullSession));
        assert_eq!(link.state(), SessionState::Running);
        assert!(link.session().is_some());

        assert!(link.detach().is_some());
        assert_eq!(link.state(), SessionState::Faulted);
        assert!(link.session().is_none());
    }

    #[test]
    fn test_cloud_links_states() {
        let links = CloudLinks::new(["room2", "room1"]);
        assert_eq!(links.len(), 2);
        links.get("room1").unwrap().set_state(SessionState::Connecting);

        let states = links.states();
        let names: Vec<_> = states.keys().cloned().collect();
        assert_eq!(names, vec!["room1", "room2"]);
        assert_eq!(states["room1"], SessionState::Connecting);
        assert_eq!(states["room2"], SessionState::Idle);
        assert!(links.get("room3").is_none());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(LocalState::Connected.to_string(), "connected");
    }
}
