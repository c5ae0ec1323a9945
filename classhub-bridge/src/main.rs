//! ClassHub bridge binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use classhub_bridge::runner::{describe_table, log_issues, log_table};
use classhub_bridge::{
    BridgeError, HubArgs, HubConfig, HubRunner, LocalBus, LocalTransport, MqttLocalBus,
    ZenohCloudConnector, ZenohLocalBus,
};
use classhub_common::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = HubArgs::parse();

    let (config, config_issues) = HubConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    init_tracing(&logging).map_err(|e| BridgeError::Logging(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting ClassHub bridge"
    );

    let (mut runner, table_issues) = HubRunner::build(config);
    log_issues(config_issues.iter().chain(table_issues.iter()));
    log_table(runner.table());

    if args.check {
        print!("{}", describe_table(runner.table()));
        return Ok(());
    }

    if runner.cloud_links().is_empty() {
        tracing::warn!("No enabled accounts, only the local bus will be served");
    }

    let local = &runner.config().local;
    tracing::info!(local = %local.address(), transport = ?local.transport, "Using local bus");

    let bus: Arc<dyn LocalBus> = match local.transport {
        LocalTransport::Mqtt => Arc::new(MqttLocalBus::new(local)),
        LocalTransport::Zenoh => Arc::new(ZenohLocalBus::new(local.zenoh())),
    };
    let cloud = Arc::new(ZenohCloudConnector::new(&runner.config().cloud));
    runner.start(bus, cloud);

    runner.run_until_signal().await;

    Ok(())
}
