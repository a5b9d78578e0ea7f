use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{DispatchError, LookupError},
    models::{
        mattermost::{Channel, CreatePost, Team, User},
        retry::RetryConfig,
        routing::{ChannelAction, RoutingRule, RoutingTable},
    },
    utils::retry_with_backoff,
};

/// Thin client over the messaging server's REST API, authenticated as the bot.
#[derive(Clone)]
pub struct MattermostClient {
    http_client: Client,
    base_url: Url,
    bot_token: String,
}

impl MattermostClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_timeout(
            &config.app_host,
            &config.bot_token,
            Duration::from_secs(config.http_timeout_seconds),
        )
    }

    pub fn with_timeout(app_host: &str, bot_token: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        let base_url =
            Url::parse(app_host).map_err(|e| anyhow!("Invalid app host {}: {}", app_host, e))?;

        if base_url.cannot_be_a_base() {
            return Err(anyhow!("App host {} cannot be used as a base URL", app_host));
        }

        info!(app_host = %base_url, "Messaging API client initialized");

        Ok(Self {
            http_client,
            base_url,
            bot_token: bot_token.to_string(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| format!("{} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /api/v4/users/email/<email>`; the email is percent-encoded as a path segment.
    pub async fn get_username_by_email(&self, email: &str) -> Result<String, LookupError> {
        let url = self
            .endpoint(&["api", "v4", "users", "email", email])
            .map_err(LookupError::Url)?;

        debug!(email, "Looking up user by email");

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(LookupError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LookupError::Status(status));
        }

        let user: User = response.json().await.map_err(LookupError::Body)?;
        Ok(user.username)
    }

    /// `POST /api/v4/posts`; only `201 Created` counts as delivered.
    pub async fn create_post(&self, channel_id: &str, message: &str) -> Result<(), DispatchError> {
        let url = self
            .endpoint(&["api", "v4", "posts"])
            .map_err(DispatchError::Url)?;

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.bot_token)
            .json(&CreatePost {
                channel_id,
                message,
            })
            .send()
            .await
            .map_err(DispatchError::Transport)?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(DispatchError::Status(status));
        }

        Ok(())
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let url = self
            .endpoint(&["api", "v4", "system", "ping"])
            .map_err(|e| anyhow!(e))?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("Ping returned status {}", response.status()))
        }
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>, Error> {
        let url = self
            .endpoint(&["api", "v4", "users", "me", "teams"])
            .map_err(|e| anyhow!(e))?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Listing teams returned status {}", status));
        }

        Ok(response.json().await?)
    }

    /// Returns `Ok(None)` when the team has no channel with that name.
    pub async fn find_channel(
        &self,
        team_name: &str,
        channel_name: &str,
    ) -> Result<Option<Channel>, Error> {
        let url = self
            .endpoint(&[
                "api",
                "v4",
                "teams",
                "name",
                team_name,
                "channels",
                "name",
                channel_name,
            ])
            .map_err(|e| anyhow!(e))?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(None),
            status => Err(anyhow!(
                "Channel lookup for {}/{} returned status {}",
                team_name,
                channel_name,
                status
            )),
        }
    }

    /// Turns configured `(action, channel name)` pairs into routing rules, one
    /// rule per team that has a channel of that name. Only a 404/403 counts as
    /// "not in this team"; any other lookup failure, after retries, fails the
    /// whole resolution so a partial table is never produced.
    pub async fn resolve_routing_rules(
        &self,
        channel_actions: &[ChannelAction],
        retry_config: &RetryConfig,
    ) -> Result<RoutingTable, Error> {
        let teams = retry_with_backoff(retry_config, || self.list_teams()).await?;

        let mut rules = Vec::new();

        for channel_action in channel_actions {
            let mut resolved = 0;

            for team in &teams {
                let found = retry_with_backoff(retry_config, || {
                    self.find_channel(&team.name, &channel_action.channel_id)
                })
                .await
                .map_err(|e| {
                    anyhow!(
                        "Failed to resolve channel {} for action {}: {}",
                        channel_action.channel_id,
                        channel_action.action,
                        e
                    )
                })?;

                if let Some(channel) = found {
                    debug!(
                        action = %channel_action.action,
                        team = %team.name,
                        channel = %channel.name,
                        destination_id = %channel.id,
                        "Resolved channel"
                    );
                    rules.push(RoutingRule::new(&channel_action.action, channel.id));
                    resolved += 1;
                }
            }

            if resolved == 0 {
                warn!(
                    action = %channel_action.action,
                    channel = %channel_action.channel_id,
                    "Channel not found in any team, action will not be routed"
                );
            }
        }

        info!(rules = rules.len(), "Routing rules resolved");

        Ok(RoutingTable::new(rules))
    }
}
