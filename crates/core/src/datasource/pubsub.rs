use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::{MessageSource, ReceivedMessage};
use crate::message::Message;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<PulledMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PulledMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    message_id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u32,
}

/// Pulls from an existing Pub/Sub subscription over the REST API.
#[derive(Debug, Clone)]
pub struct PubSubPullSource {
    http: reqwest::Client,
    endpoint: String,
    subscription: String,
    access_token: Option<String>,
    max_messages: u32,
}

impl PubSubPullSource {
    /// `subscription` is the full `projects/{project}/subscriptions/{id}` path.
    pub fn new(endpoint: impl Into<String>, subscription: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AvrosubError::Transport(format!("failed to create pull client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription: subscription.into(),
            access_token: None,
            max_messages: 100,
        })
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn post<T: Serialize + ?Sized>(&self, verb: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}/v1/{}:{}", self.endpoint, self.subscription, verb);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AvrosubError::Transport(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AvrosubError::Transport(format!(
                "POST {url} returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

fn decode_message(pulled: PulledMessage) -> Result<ReceivedMessage> {
    let payload = match pulled.message.data {
        Some(data) => STANDARD.decode(data.as_bytes()).map_err(|e| {
            AvrosubError::Transport(format!(
                "message {} has malformed data: {e}",
                pulled.message.message_id
            ))
        })?,
        None => Vec::new(),
    };

    Ok(ReceivedMessage {
        ack_id: pulled.ack_id,
        message: Message {
            id: pulled.message.message_id,
            payload,
            attributes: pulled.message.attributes,
        },
    })
}

#[async_trait]
impl MessageSource for PubSubPullSource {
    #[instrument(skip(self), fields(subscription = %self.subscription))]
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let response = self
            .post(
                "pull",
                &PullRequest {
                    max_messages: self.max_messages,
                },
            )
            .await?;
        let pulled: PullResponse = response
            .json()
            .await
            .map_err(|e| AvrosubError::Transport(format!("malformed pull response: {e}")))?;

        let mut batch = Vec::with_capacity(pulled.received_messages.len());
        let mut undecodable = Vec::new();
        for message in pulled.received_messages {
            let ack_id = message.ack_id.clone();
            match decode_message(message) {
                Ok(received) => batch.push(received),
                Err(err) => {
                    error!(%err, "acknowledging undecodable delivery");
                    undecodable.push(ack_id);
                }
            }
        }
        // Redelivery cannot repair the envelope, so these are settled here.
        if let Err(err) = self.acknowledge(&undecodable).await {
            warn!(%err, count = undecodable.len(), "failed to acknowledge undecodable deliveries");
        }
        debug!("pulled {} messages", batch.len());
        Ok(batch)
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post("acknowledge", &AcknowledgeRequest { ack_ids })
            .await
            .map(|_| ())
    }

    async fn negative_acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(
            "modifyAckDeadline",
            &ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds: 0,
            },
        )
        .await
        .map(|_| ())
    }
}
