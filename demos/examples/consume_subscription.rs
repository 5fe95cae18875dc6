use std::sync::Arc;

use avrosub::prelude::*;
use avrosub_demos::init_tracing;

/// Pulls from the subscription named by `PUBSUB_SUBSCRIPTION` and prints every
/// decoded record until ctrl-c.
///
/// Requires `GOOGLE_CLOUD_PROJECT`. Set `PUBSUB_EMULATOR_HOST` to run against
/// the local emulator, or `GOOGLE_OAUTH_ACCESS_TOKEN` for the real service.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = ConsumerConfig::from_env()?;
    let ctx = Context::from_config(config)?;
    let source = Arc::new(ctx.pubsub_source()?);
    tracing::info!(subscription = source.subscription(), "consuming");

    let consumer = ctx.consumer(source, Arc::new(StdoutSink));
    let stats = consumer
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "failed to listen for ctrl-c");
            }
        })
        .await;

    tracing::info!(
        decoded = stats.decoded,
        failed = stats.failed,
        "done"
    );
    Ok(())
}
