//! Per-account cloud session supervision.
//!
//! Each enabled account gets one [`Supervisor`] running on its own task. It
//! opens the session, registers the account's variables, serves cloud writes
//! while the session runs, and starts over after a fixed wait whenever the
//! session ends. Only the shutdown signal stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::Account;
use crate::error::TransportError;
use crate::router::MessageRouter;
use crate::transport::{AccountLink, CloudConnector, CloudSession, CloudWrite, SessionState};

/// Capacity of the channel carrying cloud writes from a session.
pub const WRITE_CHANNEL_CAPACITY: usize = 64;

/// Why one session run ended.
enum RunOutcome {
    Shutdown,
    Ended(Result<(), TransportError>),
}

/// Recovery loop for one account's cloud session.
pub struct Supervisor {
    account: Account,
    connector: Arc<dyn CloudConnector>,
    link: Arc<AccountLink>,
    router: Arc<MessageRouter>,
    retry_interval: Duration,
}

impl Supervisor {
    pub fn new(
        account: Account,
        connector: Arc<dyn CloudConnector>,
        link: Arc<AccountLink>,
        router: Arc<MessageRouter>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            account,
            connector,
            link,
            router,
            retry_interval,
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.account.name.clone();
        info!(account = %name, device_id = %self.account.device_id, "Starting cloud supervisor");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.link.set_state(SessionState::Connecting);
            debug!(account = %name, "Connecting cloud session");

            let connected = tokio::select! {
                result = self.connector.connect(&self.account) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(session) => match self.serve(session, &mut shutdown).await {
                    RunOutcome::Shutdown => break,
                    RunOutcome::Ended(Ok(())) => {
                        warn!(account = %name, "Cloud session closed");
                    }
                    RunOutcome::Ended(Err(e)) => {
                        error!(account = %name, error = %e, "Cloud session crashed");
                    }
                },
                Err(e) => {
                    error!(account = %name, error = %e, "Cloud connection failed");
                }
            }

            self.link.set_state(SessionState::Faulted);
            info!(
                account = %name,
                retry_in = ?self.retry_interval,
                "Restarting cloud session after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.link.set_state(SessionState::Stopped);
        info!(account = %name, "Cloud supervisor stopped");
    }

    async fn serve(
        &self,
        session: Arc<dyn CloudSession>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RunOutcome {
        let name = &self.account.name;

        for variable in &self.account.variables {
            let writable = variable.direction.receives_from_cloud();
            if let Err(e) = session
                .register_variable(&variable.name, variable.var_type, writable)
                .await
            {
                session.stop().await;
                return RunOutcome::Ended(Err(e));
            }
            debug!(
                account = %name,
                variable = %variable.name,
                var_type = %variable.var_type,
                writable,
                "Registered cloud variable"
            );
        }

        let (tx, mut writes) = mpsc::channel::<CloudWrite>(WRITE_CHANNEL_CAPACITY);
        self.link.attach(session.clone());
        info!(account = %name, "Cloud session running");

        let outcome = {
            let run = session.run(tx);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    result = &mut run => break RunOutcome::Ended(result),
                    Some(write) = writes.recv() => self.dispatch(write).await,
                    _ = shutdown.changed() => break RunOutcome::Shutdown,
                }
            }
        };

        self.link.detach();

        if let RunOutcome::Shutdown = outcome {
            session.stop().await;
        }

        // Writes accepted before the session ended are still relayed.
        while let Ok(write) = writes.try_recv() {
            self.dispatch(write).await;
        }

        outcome
    }

    async fn dispatch(&self, write: CloudWrite) {
        debug!(
            account = %self.account.name,
            variable = %write.variable,
            value = %write.value,
            "Cloud write received"
        );
        // Failures are logged by the router.
        let _ = self.router.route_cloud_write(&self.account.name, &write).await;
    }
}
