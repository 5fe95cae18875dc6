use std::str::FromStr;
use std::time::Duration;

use avrosub_common::{AvrosubError, Result};

use crate::registry::pubsub::DEFAULT_ENDPOINT;
use crate::registry::SchemaFetcherConfig;

pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";
pub const SUBSCRIPTION_ENV: &str = "PUBSUB_SUBSCRIPTION";
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";
pub const ENDPOINT_ENV: &str = "PUBSUB_ENDPOINT";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const FETCH_TIMEOUT_ENV: &str = "SCHEMA_FETCH_TIMEOUT_MS";
pub const CACHE_TTL_ENV: &str = "SCHEMA_CACHE_TTL_SECS";
pub const MAX_MESSAGES_ENV: &str = "PUBSUB_MAX_MESSAGES";
pub const NACK_PERMANENT_ENV: &str = "NACK_PERMANENT_FAILURES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub project_id: String,
    pub subscription: Option<String>,
    /// Base URL for both the schema and the pull APIs.
    pub endpoint: String,
    pub access_token: Option<String>,
    pub fetch_timeout: Duration,
    pub cache_ttl: Duration,
    pub max_messages: u32,
    pub nack_permanent_failures: bool,
}

impl ConsumerConfig {
    pub fn builder(project_id: impl Into<String>) -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new().with_project_id(project_id)
    }

    pub fn from_env() -> Result<Self> {
        ConsumerConfigBuilder::from_env()?.build()
    }

    /// Full subscription path; a bare id is placed under the project.
    pub fn subscription_path(&self) -> Result<String> {
        let subscription = self
            .subscription
            .as_deref()
            .ok_or_else(|| AvrosubError::MissingConfiguration(SUBSCRIPTION_ENV.to_string()))?;
        if subscription.starts_with("projects/") {
            Ok(subscription.to_string())
        } else {
            Ok(format!(
                "projects/{}/subscriptions/{}",
                self.project_id, subscription
            ))
        }
    }

    pub fn fetcher_config(&self) -> SchemaFetcherConfig {
        SchemaFetcherConfig {
            fetch_timeout: self.fetch_timeout,
            latest_ttl: self.cache_ttl,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsumerConfigBuilder {
    project_id: Option<String>,
    subscription: Option<String>,
    endpoint: Option<String>,
    access_token: Option<String>,
    fetch_timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    max_messages: Option<u32>,
    nack_permanent_failures: bool,
}

impl ConsumerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads every setting through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // The emulator takes precedence and speaks plain HTTP.
        let endpoint = match get(EMULATOR_HOST_ENV) {
            Some(host) => Some(format!("http://{host}")),
            None => get(ENDPOINT_ENV),
        };

        Ok(Self {
            project_id: get(PROJECT_ENV),
            subscription: get(SUBSCRIPTION_ENV),
            endpoint,
            access_token: get(ACCESS_TOKEN_ENV),
            fetch_timeout: parse::<u64>(FETCH_TIMEOUT_ENV, get(FETCH_TIMEOUT_ENV))?
                .map(Duration::from_millis),
            cache_ttl: parse::<u64>(CACHE_TTL_ENV, get(CACHE_TTL_ENV))?.map(Duration::from_secs),
            max_messages: parse(MAX_MESSAGES_ENV, get(MAX_MESSAGES_ENV))?,
            nack_permanent_failures: parse(NACK_PERMANENT_ENV, get(NACK_PERMANENT_ENV))?
                .unwrap_or(false),
        })
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    pub fn with_nack_permanent_failures(mut self, nack: bool) -> Self {
        self.nack_permanent_failures = nack;
        self
    }

    pub fn build(self) -> Result<ConsumerConfig> {
        let project_id = self
            .project_id
            .ok_or_else(|| AvrosubError::MissingConfiguration(PROJECT_ENV.to_string()))?;
        let defaults = SchemaFetcherConfig::default();

        Ok(ConsumerConfig {
            project_id,
            subscription: self.subscription,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            access_token: self.access_token,
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.latest_ttl),
            max_messages: self.max_messages.unwrap_or(100).max(1),
            nack_permanent_failures: self.nack_permanent_failures,
        })
    }
}

fn parse<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| {
                AvrosubError::MissingConfiguration(format!("{key} has invalid value {v:?}"))
            })
        })
        .transpose()
}
