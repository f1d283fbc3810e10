use anyhow::Context;

use tillpoint_observability::MetricsHandle;
use tillpoint_worker::config::WorkerConfig;
use tillpoint_worker::lifecycle::{termination_signal, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tillpoint_observability::init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    tracing::info!(
        concurrency = config.concurrency,
        status_addr = %config.status_addr,
        smtp = config.smtp.is_some(),
        "starting tillpoint worker"
    );

    let metrics = MetricsHandle::install()?;
    let worker = Worker::start(&config, metrics)
        .await
        .context("worker startup failed")?;

    worker.run_until(termination_signal()).await;
    Ok(())
}
