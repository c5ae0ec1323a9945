//! In-memory transports for driving the hub without a network.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use classhub_bridge::{
    Account, CloudConnector, CloudSession, CloudValue, CloudWrite, LocalBus, LocalConnection,
    LocalEvent, LocalMessage, TransportError, VariableType,
};

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Local connection that records what the hub does with it.
pub struct MockLocalConnection {
    connected: AtomicBool,
    subscriptions: Mutex<Vec<String>>,
    refused: Vec<String>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockLocalConnection {
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }
}

#[async_trait]
impl LocalConnection for MockLocalConnection {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.refused.iter().any(|t| t == topic) {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                message: "refused by broker".to_string(),
            });
        }
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Local bus handing out [`MockLocalConnection`]s.
#[derive(Default)]
pub struct MockLocalBus {
    connections: Mutex<Vec<(Arc<MockLocalConnection>, mpsc::Sender<LocalEvent>)>>,
    refused: Vec<String>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockLocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A bus whose connections fail to subscribe the given topics.
    pub fn refusing(topics: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            refused: topics.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockLocalConnection> {
        self.connections.lock()[index].0.clone()
    }

    fn current_sender(&self) -> mpsc::Sender<LocalEvent> {
        let connections = self.connections.lock();
        connections.last().expect("no local connection").1.clone()
    }

    /// Deliver a message as if a device published it.
    pub async fn inject(&self, topic: &str, payload: &str) {
        let sender = self.current_sender();
        sender
            .send(LocalEvent::Message(LocalMessage::new(topic, payload)))
            .await
            .expect("local loop is not listening");
    }

    /// Drop the current connection unexpectedly.
    pub async fn drop_connection(&self, reason: &str) {
        let (connection, sender) = {
            let connections = self.connections.lock();
            connections.last().expect("no local connection").clone()
        };
        connection.connected.store(false, Ordering::SeqCst);
        let _ = sender
            .send(LocalEvent::Disconnected(reason.to_string()))
            .await;
    }

    /// Everything published on `topic`, as text.
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl LocalBus for MockLocalBus {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn LocalConnection>, mpsc::Receiver<LocalEvent>), TransportError> {
        let connection = Arc::new(MockLocalConnection {
            connected: AtomicBool::new(true),
            subscriptions: Mutex::new(Vec::new()),
            refused: self.refused.clone(),
            published: self.published.clone(),
        });
        let (tx, rx) = mpsc::channel(64);
        self.connections.lock().push((connection.clone(), tx));
        Ok((connection, rx))
    }
}

/// Cloud session that records pushes and lets tests issue writes.
pub struct MockCloudSession {
    pub account: String,
    registered: Mutex<Vec<(String, VariableType, bool)>>,
    pushes: Mutex<Vec<(String, CloudValue)>>,
    writes: Mutex<Option<mpsc::Sender<CloudWrite>>>,
    ended: watch::Sender<Option<Result<(), TransportError>>>,
}

impl MockCloudSession {
    fn new(account: &str) -> Self {
        let (ended, _) = watch::channel(None);
        Self {
            account: account.to_string(),
            registered: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            writes: Mutex::new(None),
            ended,
        }
    }

    pub fn registered(&self) -> Vec<(String, VariableType, bool)> {
        self.registered.lock().clone()
    }

    pub fn pushes(&self) -> Vec<(String, CloudValue)> {
        self.pushes.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.writes.lock().is_some() && self.ended.borrow().is_none()
    }

    /// Issue a write from the cloud side.
    pub async fn write(&self, variable: &str, value: CloudValue) {
        let sender = self.writes.lock().clone().expect("session is not running");
        sender
            .send(CloudWrite {
                variable: variable.to_string(),
                value,
            })
            .await
            .expect("supervisor is not listening");
    }

    /// End the run loop with an error.
    pub fn crash(&self, reason: &str) {
        self.ended
            .send_replace(Some(Err(TransportError::Session(reason.to_string()))));
    }
}

#[async_trait]
impl CloudSession for MockCloudSession {
    async fn register_variable(
        &self,
        name: &str,
        var_type: VariableType,
        writable: bool,
    ) -> Result<(), TransportError> {
        self.registered
            .lock()
            .push((name.to_string(), var_type, writable));
        Ok(())
    }

    async fn run(&self, writes: mpsc::Sender<CloudWrite>) -> Result<(), TransportError> {
        let mut ended = self.ended.subscribe();
        *self.writes.lock() = Some(writes);

        let outcome = loop {
            if let Some(outcome) = ended.borrow_and_update().clone() {
                break outcome;
            }
            if ended.changed().await.is_err() {
                break Ok(());
            }
        };

        self.writes.lock().take();
        outcome
    }

    async fn stop(&self) {
        self.ended.send_replace(Some(Ok(())));
    }

    async fn set_variable(&self, name: &str, value: &CloudValue) -> Result<(), TransportError> {
        self.pushes.lock().push((name.to_string(), value.clone()));
        Ok(())
    }
}

/// Connector creating one [`MockCloudSession`] per connect.
#[derive(Default)]
pub struct MockCloudConnector {
    sessions: Mutex<BTreeMap<String, Vec<Arc<MockCloudSession>>>>,
    refused: Mutex<Vec<String>>,
}

impl MockCloudConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every connect for `account` fail.
    pub fn refuse(&self, account: &str) {
        self.refused.lock().push(account.to_string());
    }

    /// Latest session of an account.
    pub fn session(&self, account: &str) -> Option<Arc<MockCloudSession>> {
        self.sessions
            .lock()
            .get(account)
            .and_then(|sessions| sessions.last().cloned())
    }

    pub fn connect_count(&self, account: &str) -> usize {
        self.sessions
            .lock()
            .get(account)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn accounts(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl CloudConnector for MockCloudConnector {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn CloudSession>, TransportError> {
        if self.refused.lock().contains(&account.name) {
            return Err(TransportError::Connect("refused".to_string()));
        }
        let session = Arc::new(MockCloudSession::new(&account.name));
        self.sessions
            .lock()
            .entry(account.name.clone())
            .or_default()
            .push(session.clone());
        Ok(session)
    }
}
