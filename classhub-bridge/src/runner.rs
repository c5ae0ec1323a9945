//! Hub lifecycle: wiring, task group, shutdown.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::codec::Codec;
use crate::config::HubConfig;
use crate::error::ConfigIssue;
use crate::local::LocalBridge;
use crate::router::MessageRouter;
use crate::routing::RoutingTable;
use crate::status::StatusReporter;
use crate::supervisor::Supervisor;
use crate::transport::{CloudConnector, CloudLinks, LocalBus, LocalLink};

/// How long shutdown waits for the loops before aborting them.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the routing engine and the long-lived loops.
///
/// # Example
///
/// ```ignore
/// let (config, issues) = HubConfig::load("classhub.json5")?;
/// let (mut runner, more_issues) = HubRunner::build(config);
///
/// runner.start(
///     Arc::new(MqttLocalBus::new(&runner.config().local)),
///     Arc::new(ZenohCloudConnector::new(&runner.config().cloud)),
/// );
/// runner.run_until_signal().await;
/// ```
pub struct HubRunner {
    config: HubConfig,
    router: Arc<MessageRouter>,
    cloud_retry: Duration,
    local_retry: Duration,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl HubRunner {
    /// Compile the routing table and set up the links. Nothing runs yet.
    pub fn build(config: HubConfig) -> (Self, Vec<ConfigIssue>) {
        let (table, issues) = RoutingTable::build(&config.accounts, &config.topics);
        let table = Arc::new(table);

        let cloud = Arc::new(CloudLinks::new(table.accounts().iter().cloned()));
        let local = Arc::new(LocalLink::new());
        let router = Arc::new(MessageRouter::new(
            table,
            Codec::new(&config.codec),
            cloud,
            local,
        ));

        let (shutdown, _) = watch::channel(false);
        let runner = Self {
            cloud_retry: config.cloud.retry_interval(),
            local_retry: config.local.retry_interval(),
            config,
            router,
            shutdown,
            tasks: JoinSet::new(),
        };

        (runner, issues)
    }

    /// Override both retry intervals.
    pub fn with_retry_intervals(mut self, cloud: Duration, local: Duration) -> Self {
        self.cloud_retry = cloud;
        self.local_retry = local;
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        self.router.table()
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn cloud_links(&self) -> &Arc<CloudLinks> {
        self.router.cloud()
    }

    pub fn local_link(&self) -> &Arc<LocalLink> {
        self.router.local()
    }

    /// Number of running loops.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn one supervisor per enabled account and the local bus loop.
    pub fn start(&mut self, bus: Arc<dyn LocalBus>, connector: Arc<dyn CloudConnector>) {
        for account in self.config.enabled_accounts() {
            let Some(link) = self.router.cloud().get(&account.name) else {
                continue;
            };

            let supervisor = Supervisor::new(
                account.clone(),
                connector.clone(),
                link.clone(),
                self.router.clone(),
                self.cloud_retry,
            );
            self.tasks.spawn(supervisor.run(self.shutdown.subscribe()));
        }

        let mut local = LocalBridge::new(
            bus,
            self.router.local().clone(),
            self.router.clone(),
            self.local_retry,
        );
        if self.config.status.enabled {
            local = local.with_status(StatusReporter::new(
                &self.config.status.topic,
                self.router.table().clone(),
                self.router.cloud().clone(),
            ));
        }
        self.tasks.spawn(local.run(self.shutdown.subscribe()));

        info!(
            accounts = self.router.cloud().len(),
            tasks = self.tasks.len(),
            "Hub running"
        );
    }

    /// Wait for Ctrl+C or SIGTERM, then shut down.
    pub async fn run_until_signal(self) {
        info!("Hub running. Press Ctrl+C to stop.");
        wait_for_signal().await;
        info!("Received shutdown signal");
        self.shutdown(SHUTDOWN_TIMEOUT).await;
    }

    /// Signal every loop and wait for them, aborting stragglers after `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        self.shutdown.send_replace(true);

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Hub task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "Shutdown timed out, aborting tasks");
            self.tasks.shutdown().await;
        }

        info!("Goodbye!");
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Failed to listen for Ctrl+C");
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
    }
}

/// Log every skipped configuration entry.
pub fn log_issues<'a>(issues: impl IntoIterator<Item = &'a ConfigIssue>) {
    for issue in issues {
        match issue {
            ConfigIssue::InvalidAccount { account, reason } => {
                warn!(account = %account, reason = %reason, "Account skipped");
            }
            ConfigIssue::InvalidVariable {
                account,
                index,
                name,
                reason,
            } => {
                warn!(
                    account = %account,
                    index,
                    variable = name.as_deref().unwrap_or("?"),
                    reason = %reason,
                    "Variable skipped"
                );
            }
            ConfigIssue::DuplicateBinding {
                account,
                variable,
                topic,
            } => {
                warn!(
                    account = %account,
                    variable = %variable,
                    topic = %topic,
                    "Duplicate write binding dropped"
                );
            }
        }
    }
}

/// Log every route and write binding.
pub fn log_table(table: &RoutingTable) {
    for (topic, rules) in table.routes() {
        for rule in rules {
            info!(
                topic = %topic,
                account = %rule.account,
                variable = %rule.variable,
                var_type = %rule.var_type,
                "Route"
            );
        }
    }
    for (account, variable, binding) in table.bindings() {
        info!(
            account = %account,
            variable = %variable,
            topic = %binding.topic,
            var_type = %binding.var_type,
            "Write binding"
        );
    }
}

/// Human-readable listing of the routing table.
pub fn describe_table(table: &RoutingTable) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Routes (local -> cloud):");
    for (topic, rules) in table.routes() {
        for rule in rules {
            let _ = writeln!(
                out,
                "  {} -> {}.{} ({})",
                topic, rule.account, rule.variable, rule.var_type
            );
        }
    }

    let _ = writeln!(out, "Write bindings (cloud -> local):");
    for (account, variable, binding) in table.bindings() {
        let _ = writeln!(
            out,
            "  {}.{} -> {} ({})",
            account, variable, binding.topic, binding.var_type
        );
    }

    out
}
