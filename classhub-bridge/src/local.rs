//! Local bus connection loop.
//!
//! Keeps the single local connection up, re-subscribing every routed topic
//! after each connect, and feeds incoming messages to the router. A lost
//! connection is retried on a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::router::MessageRouter;
use crate::status::StatusReporter;
use crate::transport::{LocalBus, LocalConnection, LocalEvent, LocalLink, LocalState};

/// Why a connected period ended.
enum Disconnect {
    Shutdown,
    Lost(String),
}

/// Loop owning the local bus connection.
pub struct LocalBridge {
    bus: Arc<dyn LocalBus>,
    link: Arc<LocalLink>,
    router: Arc<MessageRouter>,
    retry_interval: Duration,
    status: Option<StatusReporter>,
}

impl LocalBridge {
    pub fn new(
        bus: Arc<dyn LocalBus>,
        link: Arc<LocalLink>,
        router: Arc<MessageRouter>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            bus,
            link,
            router,
            retry_interval,
            status: None,
        }
    }

    /// Publish hub status on every connect and on shutdown.
    pub fn with_status(mut self, reporter: StatusReporter) -> Self {
        self.status = Some(reporter);
        self
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            topics = self.router.table().topics().count(),
            "Starting local bus loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.link.set_state(LocalState::Connecting);
            debug!("Connecting to local bus");

            let connected = tokio::select! {
                result = self.bus.connect() => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok((connection, events)) => {
                    match self.serve(connection, events, &mut shutdown).await {
                        Disconnect::Shutdown => break,
                        Disconnect::Lost(reason) => {
                            warn!(reason = %reason, "Local bus connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Local bus connection failed");
                }
            }

            self.link.set_state(LocalState::Disconnected);
            info!(retry_in = ?self.retry_interval, "Reconnecting to local bus after backoff");

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.link.set_state(LocalState::Stopped);
        info!("Local bus loop stopped");
    }

    async fn serve(
        &self,
        connection: Arc<dyn LocalConnection>,
        mut events: mpsc::Receiver<LocalEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Disconnect {
        if let Err(e) = self.subscribe_all(connection.as_ref()).await {
            error!(error = %e, "Failed to subscribe local topics");
            connection.close().await;
            return Disconnect::Lost(e.to_string());
        }

        self.link.attach(connection.clone());
        info!("Connected to local bus");

        if let Some(reporter) = &self.status {
            if let Err(e) = reporter.publish(connection.as_ref(), &reporter.running()).await {
                warn!(topic = %reporter.topic(), error = %e, "Failed to publish running status");
            }
        }

        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LocalEvent::Message(message)) => {
                        debug!(topic = %message.topic, bytes = message.payload.len(), "Local message received");
                        self.router.route_local(&message.topic, &message.payload).await;
                    }
                    Some(LocalEvent::Disconnected(reason)) => break Disconnect::Lost(reason),
                    None => break Disconnect::Lost("event stream closed".to_string()),
                },
                _ = shutdown.changed() => break Disconnect::Shutdown,
            }
        };

        self.link.detach();

        if let Disconnect::Shutdown = outcome {
            if let Some(reporter) = &self.status {
                if let Err(e) = reporter.publish(connection.as_ref(), &reporter.offline()).await {
                    warn!(topic = %reporter.topic(), error = %e, "Failed to publish offline status");
                }
            }
        }

        connection.close().await;
        outcome
    }

    /// Subscribe every routed topic. A topic the bus refuses is skipped; only
    /// losing the connection aborts.
    async fn subscribe_all(&self, connection: &dyn LocalConnection) -> Result<(), TransportError> {
        let mut failed = 0;
        for topic in self.router.table().topics() {
            match connection.subscribe(topic).await {
                Ok(()) => debug!(topic = %topic, "Subscribed local topic"),
                Err(TransportError::NotConnected) => return Err(TransportError::NotConnected),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Failed to subscribe local topic, skipping");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            warn!(failed, "Some local topics are not served");
        }
        Ok(())
    }
}
