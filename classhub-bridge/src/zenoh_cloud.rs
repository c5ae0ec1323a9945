//! Cloud sessions over Zenoh.
//!
//! Each account opens its own session authenticated with its device id and
//! secret. Property records look like `{ "n": <variable>, "v": <value> }`:
//!
//! ```text
//! <prefix>/<device_id>/<variable>        hub -> cloud updates
//! <prefix>/<device_id>/<variable>/set    cloud -> hub writes
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use zenoh::sample::{Sample, SampleKind};

use classhub_common::topic::{cloud_property_key, cloud_write_wildcard, parse_cloud_write_key};
use classhub_common::{
    CloudValue, Credentials, Format, VariableType, ZenohConfig, connect_with_credentials,
    decode_auto, encode, has_router,
};

use crate::config::{Account, CloudConfig};
use crate::error::TransportError;
use crate::transport::{CloudConnector, CloudSession, CloudWrite};

/// How often a client-mode session checks that its router is reachable.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Opens one Zenoh session per account.
#[derive(Debug, Clone)]
pub struct ZenohCloudConnector {
    zenoh: ZenohConfig,
    key_prefix: String,
    format: Format,
}

impl ZenohCloudConnector {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            zenoh: config.zenoh.clone(),
            key_prefix: config.key_prefix.clone(),
            format: config.format,
        }
    }
}

#[async_trait]
impl CloudConnector for ZenohCloudConnector {
    async fn connect(
        &self,
        account: &Account,
    ) -> Result<Arc<dyn CloudSession>, TransportError> {
        let credentials = Credentials {
            user: account.device_id.clone(),
            password: account.secret_key.clone(),
        };

        let session = connect_with_credentials(&self.zenoh, Some(&credentials))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if self.zenoh.is_client() && !has_router(&session).await {
            let _ = session.close().await;
            return Err(TransportError::Connect("no cloud router reachable".to_string()));
        }

        info!(
            account = %account.name,
            device_id = %account.device_id,
            zid = %session.zid(),
            "Cloud session open"
        );

        let (stop, _) = watch::channel(false);
        Ok(Arc::new(ZenohCloudSession {
            account: account.name.clone(),
            device_id: account.device_id.clone(),
            key_prefix: self.key_prefix.clone(),
            format: self.format,
            check_router: self.zenoh.is_client(),
            session,
            variables: RwLock::new(BTreeMap::new()),
            stop,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    var_type: VariableType,
    writable: bool,
}

/// A cloud session of one account.
pub struct ZenohCloudSession {
    account: String,
    device_id: String,
    key_prefix: String,
    format: Format,
    check_router: bool,
    session: zenoh::Session,
    variables: RwLock<BTreeMap<String, Registration>>,
    stop: watch::Sender<bool>,
}

impl ZenohCloudSession {
    /// Turn a write sample into a typed write, if it targets a writable variable.
    fn parse_write(&self, sample: &Sample) -> Option<CloudWrite> {
        let key = sample.key_expr().as_str();
        let variable = parse_cloud_write_key(key, &self.key_prefix, &self.device_id)?;

        let registration = self.variables.read().get(variable).copied();
        let Some(registration) = registration.filter(|r| r.writable) else {
            debug!(account = %self.account, variable = %variable, "Ignoring write to read-only variable");
            return None;
        };

        let payload = sample.payload().to_bytes();
        let record: serde_json::Value = match decode_auto(&payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(account = %self.account, key = %key, error = %e, "Undecodable cloud write");
                return None;
            }
        };

        let value = record
            .get("v")
            .and_then(|v| CloudValue::from_json(registration.var_type, v));

        match value {
            Some(value) => Some(CloudWrite {
                variable: variable.to_string(),
                value,
            }),
            None => {
                warn!(
                    account = %self.account,
                    variable = %variable,
                    var_type = %registration.var_type,
                    record = %record,
                    "Cloud write does not match variable type"
                );
                None
            }
        }
    }
}

#[async_trait]
impl CloudSession for ZenohCloudSession {
    async fn register_variable(
        &self,
        name: &str,
        var_type: VariableType,
        writable: bool,
    ) -> Result<(), TransportError> {
        self.variables
            .write()
            .insert(name.to_string(), Registration { var_type, writable });
        Ok(())
    }

    async fn run(&self, writes: mpsc::Sender<CloudWrite>) -> Result<(), TransportError> {
        let key = cloud_write_wildcard(&self.key_prefix, &self.device_id);
        let subscriber = self
            .session
            .declare_subscriber(&key)
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;

        debug!(account = %self.account, key = %key, "Listening for cloud writes");

        let mut stop = self.stop.subscribe();
        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);

        loop {
            if *stop.borrow() {
                return Ok(());
            }

            tokio::select! {
                _ = stop.changed() => return Ok(()),

                _ = watchdog.tick(), if self.check_router => {
                    if !has_router(&self.session).await {
                        return Err(TransportError::Session("cloud router unreachable".to_string()));
                    }
                }

                sample = subscriber.recv_async() => match sample {
                    Ok(sample) => {
                        if sample.kind() == SampleKind::Delete {
                            continue;
                        }
                        if let Some(write) = self.parse_write(&sample) {
                            if writes.send(write).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => return Err(TransportError::Session(e.to_string())),
                },
            }
        }
    }

    async fn stop(&self) {
        self.stop.send_replace(true);
        if let Err(e) = self.session.close().await {
            warn!(account = %self.account, error = %e, "Error closing cloud session");
        }
    }

    async fn set_variable(&self, name: &str, value: &CloudValue) -> Result<(), TransportError> {
        if !self.variables.read().contains_key(name) {
            return Err(TransportError::UnknownVariable(name.to_string()));
        }

        let key = cloud_property_key(&self.key_prefix, &self.device_id, name);
        let record = json!({ "n": name, "v": value });
        let payload = encode(&record, self.format).map_err(|e| TransportError::publish(&key, e))?;

        self.session
            .put(&key, payload)
            .await
            .map_err(|e| TransportError::publish(&key, e))
    }
}
