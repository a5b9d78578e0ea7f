use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{mattermost::MattermostClient, rbmq::RabbitMqClient},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    router::RuleStore,
};

pub struct HealthChecker {
    rabbitmq: Arc<RabbitMqClient>,
    mattermost: MattermostClient,
    rules: Arc<RuleStore>,
}

impl HealthChecker {
    pub fn new(
        rabbitmq: Arc<RabbitMqClient>,
        mattermost: MattermostClient,
        rules: Arc<RuleStore>,
    ) -> Self {
        Self {
            rabbitmq,
            mattermost,
            rules,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_rabbitmq());
        checks.insert("messaging_api".to_string(), self.check_messaging_api().await);

        let routing_rules = self.rules.snapshot().len();

        HealthCheckResponse {
            status: determine_overall_status(&checks, routing_rules),
            timestamp: Utc::now(),
            routing_rules,
            checks,
        }
    }

    fn check_rabbitmq(&self) -> ServiceHealth {
        if self.rabbitmq.is_connected() {
            ServiceHealth::up()
        } else {
            warn!("RabbitMQ connection is down");
            ServiceHealth::unhealthy("Connection closed".to_string())
        }
    }

    async fn check_messaging_api(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.mattermost.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Messaging API health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Messaging API health check failed");
                ServiceHealth::unhealthy(format!("Ping failed: {}", e))
            }
        }
    }
}

/// Broker down is fatal for the relay; an unreachable API or an empty rule
/// table only degrades it.
pub fn determine_overall_status(
    checks: &HashMap<String, ServiceHealth>,
    routing_rules: usize,
) -> HealthStatus {
    let broker_down = checks
        .get("message_broker")
        .is_none_or(|health| health.status == HealthStatus::Unhealthy);

    let has_unhealthy = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if broker_down {
        HealthStatus::Unhealthy
    } else if has_unhealthy || routing_rules == 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
