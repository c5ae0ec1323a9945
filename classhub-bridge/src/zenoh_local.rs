//! Local bus over Zenoh.
//!
//! Topics map 1:1 to key expressions. Every subscription gets a forwarding
//! task that moves samples into the connection's bounded event channel.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zenoh::sample::SampleKind;

use classhub_common::{ZenohConfig, connect, has_router};

use crate::error::TransportError;
use crate::transport::{LocalBus, LocalConnection, LocalEvent, LocalMessage};

/// Capacity of the event channel of one connection.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How often a client-mode connection checks that its router is reachable.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Connects to the local bus through a Zenoh router.
#[derive(Debug, Clone)]
pub struct ZenohLocalBus {
    config: ZenohConfig,
}

impl ZenohLocalBus {
    pub fn new(config: ZenohConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LocalBus for ZenohLocalBus {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn LocalConnection>, mpsc::Receiver<LocalEvent>), TransportError> {
        let session = connect(&self.config)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if self.config.is_client() && !has_router(&session).await {
            let _ = session.close().await;
            return Err(TransportError::Connect(format!(
                "no router reachable at {:?}",
                self.config.connect
            )));
        }

        info!(zid = %session.zid(), endpoints = ?self.config.connect, "Local bus session open");

        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connection = Arc::new(ZenohLocalConnection {
            session,
            events,
            connected: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });

        if self.config.is_client() {
            let watchdog = tokio::spawn(watch_router(Arc::downgrade(&connection)));
            connection.tasks.lock().push(watchdog);
        }

        Ok((connection, rx))
    }
}

/// Reports `Disconnected` once the router stops being reachable.
async fn watch_router(connection: Weak<ZenohLocalConnection>) {
    loop {
        tokio::time::sleep(WATCHDOG_INTERVAL).await;

        let Some(connection) = connection.upgrade() else {
            return;
        };
        if !connection.is_connected() {
            return;
        }
        if !has_router(&connection.session).await {
            connection.mark_lost("local router unreachable").await;
            return;
        }
    }
}

/// One Zenoh session to the local bus.
pub struct ZenohLocalConnection {
    session: zenoh::Session,
    events: mpsc::Sender<LocalEvent>,
    connected: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ZenohLocalConnection {
    async fn mark_lost(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(LocalEvent::Disconnected(reason.to_string()))
                .await;
        }
    }
}

#[async_trait]
impl LocalConnection for ZenohLocalConnection {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let subscriber = self
            .session
            .declare_subscriber(topic.to_string())
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        let events = self.events.clone();
        let topic_name = topic.to_string();
        let forwarder = tokio::spawn(async move {
            while let Ok(sample) = subscriber.recv_async().await {
                if sample.kind() == SampleKind::Delete {
                    trace!(key = %sample.key_expr(), "Ignoring delete sample");
                    continue;
                }

                let message = LocalMessage::new(
                    sample.key_expr().as_str(),
                    sample.payload().to_bytes().into_owned(),
                );

                match events.try_send(LocalEvent::Message(message)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(topic = %topic_name, "Local event channel full, dropping message");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            debug!(topic = %topic_name, "Local subscription ended");
        });

        self.tasks.lock().push(forwarder);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.session
            .put(topic, payload)
            .await
            .map_err(|e| TransportError::publish(topic, e))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Error closing local bus session");
        }
    }
}
