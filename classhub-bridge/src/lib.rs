//! ClassHub Bridge
//!
//! Relays device status from the classroom bus to cloud variables, and cloud
//! writes back to device command topics, driven entirely by configuration.
//!
//! # Overview
//!
//! - [`HubConfig`] loads and validates accounts and variables
//! - [`RoutingTable`] compiles them into topic routes and write bindings
//! - [`Codec`] converts device payloads to and from [`CloudValue`]s
//! - [`MessageRouter`] dispatches messages in both directions
//! - [`Supervisor`] keeps one cloud session per account alive
//! - [`LocalBridge`] keeps the local bus connection alive
//! - [`HubRunner`] wires everything into a task group with graceful shutdown
//!
//! The transports sit behind the traits in [`transport`]. The local bus is
//! MQTT by default ([`mqtt_local`]) or Zenoh ([`zenoh_local`]); the cloud link
//! is Zenoh ([`zenoh_cloud`]).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use classhub_bridge::{HubConfig, HubRunner, MqttLocalBus, ZenohCloudConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (config, _issues) = HubConfig::load("classhub.json5")?;
//!     let (mut runner, _) = HubRunner::build(config);
//!
//!     let bus = Arc::new(MqttLocalBus::new(&runner.config().local));
//!     let cloud = Arc::new(ZenohCloudConnector::new(&runner.config().cloud));
//!     runner.start(bus, cloud);
//!
//!     runner.run_until_signal().await;
//!     Ok(())
//! }
//! ```

mod args;
pub mod codec;
pub mod config;
mod error;
pub mod local;
pub mod mqtt_local;
pub mod router;
pub mod routing;
pub mod runner;
pub mod status;
pub mod supervisor;
pub mod transport;
pub mod zenoh_cloud;
pub mod zenoh_local;

pub use args::HubArgs;
pub use codec::Codec;
pub use config::{Account, HubConfig, LocalTransport, Variable};
pub use error::{
    BridgeError, CodecDirection, CodecError, ConfigIssue, Result, RouteError, TransportError,
};
pub use local::LocalBridge;
pub use mqtt_local::MqttLocalBus;
pub use router::{InboundReport, MessageRouter};
pub use routing::{RouteRule, RoutingTable, WriteBinding};
pub use runner::HubRunner;
pub use status::{HubStatus, StatusReporter};
pub use supervisor::Supervisor;
pub use transport::{
    AccountLink, CloudConnector, CloudLinks, CloudSession, CloudWrite, LocalBus, LocalConnection,
    LocalEvent, LocalLink, LocalMessage, LocalState, SessionState,
};
pub use zenoh_cloud::ZenohCloudConnector;
pub use zenoh_local::ZenohLocalBus;

// Re-export commonly used types from classhub-common
pub use classhub_common::{
    CloudValue, Color, Dimmed, Direction, Format, LoggingConfig, TopicConvention, VariableType,
    ZenohConfig,
};
