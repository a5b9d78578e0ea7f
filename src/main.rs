use std::{sync::Arc, time::Duration};

use action_relay::{
    api::run_api_server,
    clients::{health::HealthChecker, mattermost::MattermostClient, rbmq::RabbitMqClient},
    config::Config,
    dispatcher::Dispatcher,
    router::RuleStore,
    utils::MessageProcessor,
};
use anyhow::{Error, Result, anyhow};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "action_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::load()?;
    info!(?config, "Configuration loaded");

    let mattermost = MattermostClient::new(&config)?;
    let table = mattermost
        .resolve_routing_rules(&config.channel_actions()?, &config.retry_config())
        .await?;
    let rules = Arc::new(RuleStore::new(table));

    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);
    let shutdown = CancellationToken::new();

    let processor = Arc::new(MessageProcessor::new(
        Dispatcher::from_config(mattermost.clone(), &config),
        Arc::clone(&rules),
        config.decode_failure_policy,
    ));

    let mut consumer = rabbitmq
        .subscribe(&config.queue_name, processor, shutdown.clone())
        .await?;

    let health_checker =
        HealthChecker::new(Arc::clone(&rabbitmq), mattermost.clone(), Arc::clone(&rules));
    let api_shutdown = shutdown.clone();
    let server_port = config.server_port;
    let api = tokio::spawn(async move {
        if let Err(e) = run_api_server(server_port, health_checker, api_shutdown).await {
            error!(error = %e, "Health check server failed");
        }
    });

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let finished = loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading routing rules");
                if let Err(e) = reload_rules(&mattermost, &rules).await {
                    error!(error = %e, "Reload failed, keeping previous routing rules");
                }
            }
            _ = terminate.recv() => break None,
            _ = tokio::signal::ctrl_c() => break None,
            joined = &mut consumer => break Some(joined),
        }
    };

    info!("Shutting down");
    shutdown.cancel();

    let joined = match finished {
        Some(joined) => Some(joined),
        None => {
            let grace = Duration::from_secs(config.shutdown_grace_seconds);
            match tokio::time::timeout(grace, &mut consumer).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!(
                        grace_seconds = config.shutdown_grace_seconds,
                        "In-flight message did not finish within grace period"
                    );
                    consumer.abort();
                    None
                }
            }
        }
    };

    rabbitmq.disconnect().await;

    if let Err(e) = api.await {
        warn!(error = %e, "Health check server task failed");
    }

    match joined {
        Some(Ok(Err(e))) => Err(e),
        Some(Err(e)) => Err(anyhow!("Consumer task failed: {}", e)),
        _ => Ok(()),
    }
}

async fn reload_rules(mattermost: &MattermostClient, rules: &RuleStore) -> Result<(), Error> {
    let config = Config::reload()?;
    let table = mattermost
        .resolve_routing_rules(&config.channel_actions()?, &config.retry_config())
        .await?;

    rules.replace(table);

    Ok(())
}
