use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tracing::{info, warn};

use crate::{clients::mattermost::MattermostClient, config::Config, error::DispatchError};

/// Delivers one event's notification to one destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        destination_id: &str,
        message: &str,
        link: &str,
        emails: &[String],
    ) -> Result<(), DispatchError>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn notify(
        &self,
        destination_id: &str,
        message: &str,
        link: &str,
        emails: &[String],
    ) -> Result<(), DispatchError> {
        (**self).notify(destination_id, message, link, emails).await
    }
}

/// Resolves mentions and posts the composed message. Holds no state between calls.
#[derive(Clone)]
pub struct Dispatcher {
    client: MattermostClient,
    lookup_concurrency: usize,
}

impl Dispatcher {
    pub fn new(client: MattermostClient, lookup_concurrency: usize) -> Self {
        Self {
            client,
            lookup_concurrency: lookup_concurrency.max(1),
        }
    }

    pub fn from_config(client: MattermostClient, config: &Config) -> Self {
        Self::new(client, config.mention_lookup_concurrency)
    }

    /// Looks up every email, keeping the input order. Failed lookups are
    /// logged and dropped.
    pub async fn resolve_mentions(&self, emails: &[String]) -> Vec<String> {
        let client = self.client.clone();

        stream::iter(emails.to_vec())
            .map(move |email| {
                let client = client.clone();
                async move {
                    match client.get_username_by_email(&email).await {
                        Ok(username) => Some(format!("@{}", username)),
                        Err(e) => {
                            warn!(email = %email, error = %e, "Failed to resolve mention");
                            None
                        }
                    }
                }
            })
            .buffered(self.lookup_concurrency)
            .filter_map(|mention| async move { mention })
            .collect()
            .await
    }

    pub async fn dispatch(
        &self,
        destination_id: &str,
        message: &str,
        link: &str,
        emails: &[String],
    ) -> Result<(), DispatchError> {
        let mentions = self.resolve_mentions(emails).await;
        let body = format_message(message, link, &mentions);

        self.client.create_post(destination_id, &body).await?;

        info!(
            destination_id,
            mentions = mentions.len(),
            "Notification posted"
        );

        Ok(())
    }
}

#[async_trait]
impl Notifier for Dispatcher {
    async fn notify(
        &self,
        destination_id: &str,
        message: &str,
        link: &str,
        emails: &[String],
    ) -> Result<(), DispatchError> {
        self.dispatch(destination_id, message, link, emails).await
    }
}

/// `<message>\n\nLink: [<link>](<link>)\n` followed by each mention and a space.
pub fn format_message(message: &str, link: &str, mentions: &[String]) -> String {
    let tagged: String = mentions
        .iter()
        .map(|mention| format!("{} ", mention))
        .collect();

    format!("{}\n\nLink: [{}]({})\n{}", message, link, link, tagged)
}
