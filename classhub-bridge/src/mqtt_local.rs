//! Local bus over MQTT.
//!
//! The classroom devices talk MQTT to a broker such as Mosquitto. Each
//! connection owns one client and a task driving its event loop; incoming
//! publishes go to the bounded event channel, and the first event loop error
//! ends the connection with `Disconnected`. The hub reconnects with a fresh
//! client, so broker-side session state is never relied on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LocalBusConfig;
use crate::error::TransportError;
use crate::transport::{LocalBus, LocalConnection, LocalEvent, LocalMessage};

/// Capacity of the event channel of one connection.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the client's outgoing request queue.
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long to wait for the broker's CONNACK.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `close` waits for the event loop to flush DISCONNECT.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Connects to the local MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttLocalBus {
    config: LocalBusConfig,
}

impl MqttLocalBus {
    pub fn new(config: &LocalBusConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);
        if let Some(username) = &self.config.username {
            options.set_credentials(username, self.config.password.as_deref().unwrap_or(""));
        }
        options
    }
}

#[async_trait]
impl LocalBus for MqttLocalBus {
    async fn connect(
        &self,
    ) -> Result<(Arc<dyn LocalConnection>, mpsc::Receiver<LocalEvent>), TransportError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "no CONNACK from {} within {:?}",
                    self.config.address(),
                    CONNECT_TIMEOUT
                ))
            })??;

        info!(
            broker = %self.config.address(),
            client_id = %self.config.client_id,
            "Local MQTT session open"
        );

        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive(eventloop, events, connected.clone()));

        let connection = Arc::new(MqttLocalConnection {
            client,
            connected,
            driver: Mutex::new(Some(driver)),
        });
        Ok((connection, rx))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Connect(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

/// Poll the event loop until it fails or the hub stops listening.
async fn drive(
    mut eventloop: EventLoop,
    events: mpsc::Sender<LocalEvent>,
    connected: Arc<AtomicBool>,
) {
    let reason = loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = LocalMessage::new(publish.topic, publish.payload.to_vec());
                match events.try_send(LocalEvent::Message(message)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(LocalEvent::Message(message))) => {
                        warn!(topic = %message.topic, "Local event channel full, dropping message");
                    }
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => return,
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    warn!(pkid = ack.pkid, "Broker rejected a local subscription");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => break "broker sent DISCONNECT".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    if connected.swap(false, Ordering::SeqCst) {
        let _ = events.send(LocalEvent::Disconnected(reason)).await;
    }
    debug!("Local MQTT event loop ended");
}

/// One MQTT client connection to the local broker.
pub struct MqttLocalConnection {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl LocalConnection for MqttLocalConnection {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::publish(topic, e))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let Some(mut driver) = self.driver.lock().take() else {
            return;
        };

        if was_connected {
            if let Err(e) = self.client.disconnect().await {
                debug!(error = %e, "Error sending MQTT DISCONNECT");
            }
            // The event loop ends once DISCONNECT is flushed.
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut driver).await.is_ok() {
                return;
            }
        }
        driver.abort();
    }
}
