//! Hub status reporting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::routing::RoutingTable;
use crate::transport::{CloudLinks, LocalConnection};

/// Name reported in status records.
pub const HUB_NAME: &str = "classhub";

/// Hub status record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStatus {
    /// Hub name.
    pub bridge: String,
    /// Hub version.
    pub version: String,
    /// Current status ("running", "offline").
    pub status: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl HubStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge, version, "offline")
    }

    fn with_status(
        bridge: impl Into<String>,
        version: impl Into<String>,
        status: &str,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Serialize)]
struct StatusMetadata {
    accounts: Vec<String>,
    routes: usize,
    bindings: usize,
    sessions: BTreeMap<String, crate::transport::SessionState>,
}

/// Publishes status records on the local bus.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    topic: String,
    version: String,
    table: Arc<RoutingTable>,
    links: Arc<CloudLinks>,
}

impl StatusReporter {
    pub fn new(topic: impl Into<String>, table: Arc<RoutingTable>, links: Arc<CloudLinks>) -> Self {
        Self {
            topic: topic.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            table,
            links,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn metadata(&self) -> serde_json::Value {
        let metadata = StatusMetadata {
            accounts: self.table.accounts().to_vec(),
            routes: self.table.route_count(),
            bindings: self.table.binding_count(),
            sessions: self.links.states(),
        };
        serde_json::to_value(metadata).unwrap_or(serde_json::Value::Null)
    }

    pub fn running(&self) -> HubStatus {
        HubStatus::running(HUB_NAME, &self.version).with_metadata(self.metadata())
    }

    pub fn offline(&self) -> HubStatus {
        HubStatus::offline(HUB_NAME, &self.version).with_metadata(self.metadata())
    }

    pub async fn publish(
        &self,
        connection: &dyn LocalConnection,
        status: &HubStatus,
    ) -> Result<(), TransportError> {
        let payload =
            serde_json::to_vec(status).map_err(|e| TransportError::publish(&self.topic, e))?;
        connection.publish(&self.topic, payload).await
    }
}
