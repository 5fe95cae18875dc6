use std::time::Duration;

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};
use reqwest::StatusCode;
use tracing::debug;

use super::{GetSchemaRequest, SchemaDefinition, SchemaServiceClient, SchemaServiceConnector};

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Connects to the Pub/Sub schema service over its REST API.
#[derive(Debug, Clone)]
pub struct PubSubSchemaConnector {
    endpoint: String,
    access_token: Option<String>,
    request_timeout: Duration,
}

impl PubSubSchemaConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SchemaServiceConnector for PubSubSchemaConnector {
    async fn connect(&self) -> Result<Box<dyn SchemaServiceClient>> {
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| {
                AvrosubError::SchemaServiceUnavailable(format!(
                    "failed to create schema service client: {e}"
                ))
            })?;

        Ok(Box::new(PubSubSchemaClient {
            http,
            endpoint: self.endpoint.clone(),
            access_token: self.access_token.clone(),
        }))
    }
}

struct PubSubSchemaClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

#[async_trait]
impl SchemaServiceClient for PubSubSchemaClient {
    async fn get_schema(&self, request: &GetSchemaRequest) -> Result<SchemaDefinition> {
        let url = format!("{}/v1/{}", self.endpoint, request.name);

        let mut call = self
            .http
            .get(&url)
            .query(&[("view", request.view.as_str())]);
        if let Some(token) = &self.access_token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| {
            AvrosubError::SchemaServiceUnavailable(format!("GET {url} failed: {e}"))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AvrosubError::SchemaNotFound(request.name.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AvrosubError::SchemaServiceUnavailable(format!(
                "GET {url} returned {status}: {body}"
            )));
        }

        let definition: SchemaDefinition = response.json().await.map_err(|e| {
            AvrosubError::InvalidSchema(format!(
                "malformed schema response for {}: {e}",
                request.name
            ))
        })?;

        debug!(
            name = %definition.name,
            schema_type = ?definition.schema_type,
            "schema service lookup succeeded"
        );
        Ok(definition)
    }
}
