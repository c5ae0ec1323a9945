//! The hot path between the local bus and the cloud sessions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::error::{RouteError, TransportError};
use crate::routing::{RouteRule, RoutingTable};
use crate::transport::{CloudLinks, CloudWrite, LocalLink};

/// Outcome of routing one local message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundReport {
    /// Rules whose value reached the cloud session.
    pub delivered: Vec<RouteRule>,
    /// Rules that failed, with the reason.
    pub failures: Vec<(RouteRule, RouteError)>,
}

impl InboundReport {
    /// No rule matched the topic.
    pub fn is_ignored(&self) -> bool {
        self.delivered.is_empty() && self.failures.is_empty()
    }
}

/// Dispatches messages in both directions using the routing table.
///
/// All entry points take `&self` and may run concurrently.
#[derive(Debug)]
pub struct MessageRouter {
    table: Arc<RoutingTable>,
    codec: Codec,
    cloud: Arc<CloudLinks>,
    local: Arc<LocalLink>,
}

impl MessageRouter {
    pub fn new(
        table: Arc<RoutingTable>,
        codec: Codec,
        cloud: Arc<CloudLinks>,
        local: Arc<LocalLink>,
    ) -> Self {
        Self {
            table,
            codec,
            cloud,
            local,
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn cloud(&self) -> &Arc<CloudLinks> {
        &self.cloud
    }

    pub fn local(&self) -> &Arc<LocalLink> {
        &self.local
    }

    /// Relay a local message to every cloud variable mapped to its topic.
    ///
    /// Each rule is handled on its own: a bad payload for one variable or a
    /// down session for one account does not affect the others.
    pub async fn route_local(&self, topic: &str, payload: &[u8]) -> InboundReport {
        let mut report = InboundReport::default();
        let rules = self.table.rules(topic);

        if rules.is_empty() {
            debug!(topic = %topic, "No route for local topic");
            return report;
        }

        for rule in rules {
            match self.push(rule, payload).await {
                Ok(()) => {
                    debug!(
                        topic = %topic,
                        account = %rule.account,
                        variable = %rule.variable,
                        "Pushed value to cloud"
                    );
                    report.delivered.push(rule.clone());
                }
                Err(e) => {
                    warn!(
                        topic = %topic,
                        account = %rule.account,
                        variable = %rule.variable,
                        payload = %String::from_utf8_lossy(payload),
                        error = %e,
                        "Failed to route local message"
                    );
                    report.failures.push((rule.clone(), e));
                }
            }
        }

        report
    }

    async fn push(&self, rule: &RouteRule, payload: &[u8]) -> Result<(), RouteError> {
        let value = self.codec.decode(&rule.variable, rule.var_type, payload)?;

        let session = self
            .cloud
            .get(&rule.account)
            .and_then(|link| link.session())
            .ok_or(TransportError::NotConnected)?;

        session.set_variable(&rule.variable, &value).await?;
        Ok(())
    }

    /// Relay a cloud write to the variable's command topic.
    ///
    /// Returns the topic published to, or `None` when the variable has no
    /// write binding. Nothing is published when encoding fails, and nothing
    /// is queued while the local bus is down.
    pub async fn route_cloud_write(
        &self,
        account: &str,
        write: &CloudWrite,
    ) -> Result<Option<String>, RouteError> {
        let Some(binding) = self.table.binding(account, &write.variable) else {
            warn!(
                account = %account,
                variable = %write.variable,
                "Cloud write for a variable without write binding"
            );
            return Ok(None);
        };

        let result = self.publish_write(&binding.topic, binding.var_type, write).await;

        match &result {
            Ok(payload) => info!(
                account = %account,
                variable = %write.variable,
                topic = %binding.topic,
                payload = %payload,
                "Relayed cloud write"
            ),
            Err(e) => warn!(
                account = %account,
                variable = %write.variable,
                topic = %binding.topic,
                value = %write.value,
                error = %e,
                "Failed to relay cloud write"
            ),
        }

        result.map(|_| Some(binding.topic.clone()))
    }

    async fn publish_write(
        &self,
        topic: &str,
        var_type: classhub_common::VariableType,
        write: &CloudWrite,
    ) -> Result<String, RouteError> {
        let payload = self.codec.encode(&write.variable, var_type, &write.value)?;

        let connection = self.local.connection().ok_or(TransportError::NotConnected)?;
        connection
            .publish(topic, payload.clone().into_bytes())
            .await?;

        Ok(payload)
    }
}
