use std::{fmt::Display, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::DecodeFailurePolicy,
    dispatcher::Notifier,
    error::DecodeError,
    models::{event::ActionEvent, retry::RetryConfig},
    router::{RuleStore, route},
};

/// Confirms a delivery with the broker so it is not redelivered.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn acknowledge(&self) -> Result<(), Error>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub action: String,
    pub destinations: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Decode, route and dispatch for a single queue message.
pub struct MessageProcessor<N> {
    notifier: N,
    rules: Arc<RuleStore>,
    decode_failure_policy: DecodeFailurePolicy,
}

impl<N: Notifier> MessageProcessor<N> {
    pub fn new(
        notifier: N,
        rules: Arc<RuleStore>,
        decode_failure_policy: DecodeFailurePolicy,
    ) -> Self {
        Self {
            notifier,
            rules,
            decode_failure_policy,
        }
    }

    /// Dispatches to every matching destination. A failed destination is
    /// logged and counted; it never stops the remaining ones.
    pub async fn process(&self, payload: &[u8]) -> Result<ProcessReport, DecodeError> {
        let event = ActionEvent::decode(payload)?;
        let rules = self.rules.snapshot();
        let destinations = route(&event, &rules);

        let mut report = ProcessReport {
            action: event.action.clone(),
            destinations: destinations.len(),
            ..Default::default()
        };

        if destinations.is_empty() {
            debug!(action = %event.action, "No routing rule matches action");
            return Ok(report);
        }

        for destination_id in destinations {
            match self
                .notifier
                .notify(destination_id, &event.message, &event.link, &event.emails)
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        action = %event.action,
                        destination_id,
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Processes one delivery and acknowledges it exactly once, whatever the
    /// dispatch outcome. Only a decode failure under `Abort` returns an error,
    /// and then the delivery is left unacknowledged.
    pub async fn handle<A: Acknowledge>(&self, payload: &[u8], acker: &A) -> Result<(), Error> {
        match self.process(payload).await {
            Ok(report) => {
                info!(
                    action = %report.action,
                    destinations = report.destinations,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Message processed"
                );
            }
            Err(e) => match self.decode_failure_policy {
                DecodeFailurePolicy::Skip => {
                    warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(payload),
                        "Discarding undecodable message"
                    );
                }
                DecodeFailurePolicy::Abort => {
                    error!(
                        error = %e,
                        payload = %String::from_utf8_lossy(payload),
                        "Undecodable message, stopping consumer"
                    );
                    return Err(anyhow!("Failed to decode message: {}", e));
                }
            },
        }

        if let Err(e) = acker.acknowledge().await {
            warn!(error = %e, "Failed to acknowledge message");
        }

        Ok(())
    }
}

/// Pulls deliveries one at a time until `shutdown` fires.
/// A message already being processed is finished before shutdown is observed.
/// The stream ending on its own (the broker closed the channel) is an error.
pub async fn run_consumer<S, A, E, N>(
    mut deliveries: S,
    processor: Arc<MessageProcessor<N>>,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    S: Stream<Item = Result<(Vec<u8>, A), E>> + Unpin,
    A: Acknowledge,
    E: Display,
    N: Notifier,
{
    info!("Waiting for messages");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, consumer stopping");
                break;
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok((payload, acker))) => {
                debug!(bytes = payload.len(), "Received message");
                processor.handle(&payload, &acker).await?;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Consumer stream error");
            }
            None if shutdown.is_cancelled() => {
                info!("Consumer stream closed during shutdown");
                break;
            }
            None => {
                error!("Consumer stream closed unexpectedly");
                return Err(anyhow!("Consumer stream closed unexpectedly"));
            }
        }
    }

    Ok(())
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);

                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(delay_ms * config.backoff_multiplier, config.max_delay_ms);
            }
        }
    }
}
