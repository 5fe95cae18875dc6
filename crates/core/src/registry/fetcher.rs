use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use avrosub_common::{AvrosubError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use tracing::{debug, instrument, warn};

use super::{CompiledSchema, GetSchemaRequest, SchemaDescriptor, SchemaServiceConnector};

type PendingLookup = Shared<BoxFuture<'static, Result<Arc<CompiledSchema>>>>;
type PendingLookups = Arc<Mutex<HashMap<SchemaDescriptor, PendingLookup>>>;

#[derive(Debug, Clone)]
pub struct SchemaFetcherConfig {
    /// Upper bound on one connect-and-lookup round trip.
    pub fetch_timeout: Duration,
    /// How long a "latest revision" lookup stays cached.
    pub latest_ttl: Duration,
    pub max_capacity: u64,
}

impl Default for SchemaFetcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(10_000),
            latest_ttl: Duration::from_secs(300),
            max_capacity: 10_000,
        }
    }
}

/// Resolves schema descriptors to compiled schemas through the schema
/// service, caching successful lookups.
///
/// Pinned revisions never change, so they are kept until evicted for
/// capacity. Latest-revision lookups expire after `latest_ttl`. Concurrent
/// misses for one descriptor share a single lookup, and failures are never
/// cached.
///
/// Each lookup runs on its own task and stores its result in the cache when
/// it completes. A caller that gives up does not abort it; the remaining
/// callers, and later ones, receive its result.
pub struct SchemaFetcher {
    connector: Arc<dyn SchemaServiceConnector>,
    config: SchemaFetcherConfig,
    pinned: Cache<SchemaDescriptor, Arc<CompiledSchema>>,
    latest: Cache<SchemaDescriptor, Arc<CompiledSchema>>,
    pending: PendingLookups,
}

impl SchemaFetcher {
    pub fn new(connector: Arc<dyn SchemaServiceConnector>) -> Self {
        Self::with_config(connector, SchemaFetcherConfig::default())
    }

    pub fn with_config(
        connector: Arc<dyn SchemaServiceConnector>,
        config: SchemaFetcherConfig,
    ) -> Self {
        let pinned = Cache::builder().max_capacity(config.max_capacity).build();
        let latest = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.latest_ttl)
            .build();

        Self {
            connector,
            config,
            pinned,
            latest,
            pending: PendingLookups::default(),
        }
    }

    pub fn config(&self) -> &SchemaFetcherConfig {
        &self.config
    }

    fn cache_for(
        &self,
        descriptor: &SchemaDescriptor,
    ) -> &Cache<SchemaDescriptor, Arc<CompiledSchema>> {
        if descriptor.is_pinned() {
            &self.pinned
        } else {
            &self.latest
        }
    }

    #[instrument(skip(self, descriptor), fields(schema = %descriptor))]
    pub async fn fetch(&self, descriptor: &SchemaDescriptor) -> Result<Arc<CompiledSchema>> {
        if let Some(schema) = self.cache_for(descriptor).get(descriptor).await {
            return Ok(schema);
        }
        self.pending_lookup(descriptor).await
    }

    /// Joins the lookup already running for `descriptor`, or starts one.
    fn pending_lookup(&self, descriptor: &SchemaDescriptor) -> PendingLookup {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lookup) = pending.get(descriptor) {
            return lookup.clone();
        }

        let task = tokio::spawn(lookup_and_store(
            self.connector.clone(),
            self.config.fetch_timeout,
            descriptor.clone(),
            self.cache_for(descriptor).clone(),
            self.pending.clone(),
        ));
        let (key, registry) = (descriptor.clone(), self.pending.clone());
        let shared = async move {
            task.await.unwrap_or_else(|e| {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
                Err(AvrosubError::SchemaServiceUnavailable(format!(
                    "schema lookup task failed: {e}"
                )))
            })
        }
        .boxed()
        .shared();
        pending.insert(descriptor.clone(), shared.clone());
        shared
    }

    /// Looks the schema up on a fresh connection, bypassing the cache.
    pub async fn fetch_uncached(
        &self,
        descriptor: &SchemaDescriptor,
    ) -> Result<Arc<CompiledSchema>> {
        lookup(self.connector.as_ref(), self.config.fetch_timeout, descriptor).await
    }

    pub async fn invalidate(&self, descriptor: &SchemaDescriptor) {
        self.pinned.invalidate(descriptor).await;
        self.latest.invalidate(descriptor).await;
    }

    pub fn cached_entries(&self) -> u64 {
        self.pinned.entry_count() + self.latest.entry_count()
    }
}

async fn lookup_and_store(
    connector: Arc<dyn SchemaServiceConnector>,
    fetch_timeout: Duration,
    descriptor: SchemaDescriptor,
    cache: Cache<SchemaDescriptor, Arc<CompiledSchema>>,
    pending: PendingLookups,
) -> Result<Arc<CompiledSchema>> {
    let result = lookup(connector.as_ref(), fetch_timeout, &descriptor).await;
    match &result {
        Ok(schema) => cache.insert(descriptor.clone(), schema.clone()).await,
        Err(err) => warn!(schema = %descriptor, %err, "schema lookup failed"),
    }
    // Removed after the insert so a caller always finds one or the other.
    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&descriptor);
    result
}

async fn lookup(
    connector: &dyn SchemaServiceConnector,
    fetch_timeout: Duration,
    descriptor: &SchemaDescriptor,
) -> Result<Arc<CompiledSchema>> {
    let round_trip = async {
        let client = connector.connect().await?;
        let request = GetSchemaRequest::full(descriptor);
        client.get_schema(&request).await
    };

    let definition = tokio::time::timeout(fetch_timeout, round_trip)
        .await
        .map_err(|_| {
            AvrosubError::SchemaServiceUnavailable(format!(
                "lookup of {descriptor} timed out after {fetch_timeout:?}"
            ))
        })??;

    debug!(
        schema = %descriptor,
        revision_id = definition.revision_id.as_deref().unwrap_or_default(),
        "fetched schema"
    );
    CompiledSchema::from_definition(descriptor.clone(), definition).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySchemaService;

    const V1: &str = r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "long"}]}"#;
    const V2: &str = r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "string"}]}"#;
    const NAME: &str = "projects/p/schemas/orders";

    fn fetcher(service: &InMemorySchemaService, config: SchemaFetcherConfig) -> SchemaFetcher {
        SchemaFetcher::with_config(Arc::new(service.clone()), config)
    }

    #[tokio::test]
    async fn test_pinned_revision_is_cached() {
        let service = InMemorySchemaService::new().with_schema(NAME, "r1", V1);
        let fetcher = fetcher(&service, SchemaFetcherConfig::default());
        let descriptor = SchemaDescriptor::new(NAME, Some("r1".to_string()));

        let first = fetcher.fetch(&descriptor).await.unwrap();
        let second = fetcher.fetch(&descriptor).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.revision_id.as_deref(), Some("r1"));
        assert_eq!(service.lookups(), 1);
        assert_eq!(service.connections_opened(), 1);
        assert_eq!(service.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_lookup() {
        let service = InMemorySchemaService::new()
            .with_schema(NAME, "r1", V1)
            .with_latency(Duration::from_millis(50));
        let fetcher = Arc::new(fetcher(&service, SchemaFetcherConfig::default()));
        let descriptor = SchemaDescriptor::new(NAME, Some("r1".to_string()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let fetcher = fetcher.clone();
            let descriptor = descriptor.clone();
            handles.push(tokio::spawn(
                async move { fetcher.fetch(&descriptor).await },
            ));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(service.lookups(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let service = InMemorySchemaService::new();
        let fetcher = fetcher(&service, SchemaFetcherConfig::default());
        let descriptor = SchemaDescriptor::new(NAME, Some("r1".to_string()));

        let result = fetcher.fetch(&descriptor).await;
        assert!(matches!(result, Err(AvrosubError::SchemaNotFound(_))));

        service.insert_schema(NAME, "r1", V1);
        assert!(fetcher.fetch(&descriptor).await.is_ok());
        assert_eq!(service.lookups(), 2);
    }

    #[tokio::test]
    async fn test_latest_lookup_expires() {
        let service = InMemorySchemaService::new().with_schema(NAME, "r1", V1);
        let fetcher = fetcher(
            &service,
            SchemaFetcherConfig {
                latest_ttl: Duration::from_millis(100),
                ..Default::default()
            },
        );
        let latest = SchemaDescriptor::new(NAME, None);

        let first = fetcher.fetch(&latest).await.unwrap();
        assert_eq!(first.revision_id.as_deref(), Some("r1"));

        service.insert_schema(NAME, "r2", V2);
        let cached = fetcher.fetch(&latest).await.unwrap();
        assert_eq!(cached.revision_id.as_deref(), Some("r1"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let refreshed = fetcher.fetch(&latest).await.unwrap();
        assert_eq!(refreshed.revision_id.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let service = InMemorySchemaService::new()
            .with_schema(NAME, "r1", V1)
            .with_latency(Duration::from_millis(500));
        let fetcher = fetcher(
            &service,
            SchemaFetcherConfig {
                fetch_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let result = fetcher
            .fetch(&SchemaDescriptor::new(NAME, Some("r1".to_string())))
            .await;
        assert!(matches!(
            result,
            Err(AvrosubError::SchemaServiceUnavailable(_))
        ));
        assert_eq!(service.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_invalid_definition_is_invalid_schema() {
        let service = InMemorySchemaService::new().with_schema(NAME, "r1", "{\"type\": ");
        let fetcher = fetcher(&service, SchemaFetcherConfig::default());
        let result = fetcher
            .fetch(&SchemaDescriptor::new(NAME, Some("r1".to_string())))
            .await;
        assert!(matches!(result, Err(AvrosubError::InvalidSchema(_))));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_restart_lookup() {
        let service = InMemorySchemaService::new()
            .with_schema(NAME, "r1", V1)
            .with_latency(Duration::from_millis(300));
        let fetcher = Arc::new(fetcher(&service, SchemaFetcherConfig::default()));
        let descriptor = SchemaDescriptor::new(NAME, Some("r1".to_string()));

        let spawn_fetch = || {
            let fetcher = fetcher.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { fetcher.fetch(&descriptor).await })
        };

        let first = spawn_fetch();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = spawn_fetch();
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.abort();

        assert!(first.await.unwrap_err().is_cancelled());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(service.lookups(), 1);
    }

    #[tokio::test]
    async fn test_lookup_completes_after_every_waiter_leaves() {
        let service = InMemorySchemaService::new()
            .with_schema(NAME, "r1", V1)
            .with_latency(Duration::from_millis(100));
        let fetcher = Arc::new(fetcher(&service, SchemaFetcherConfig::default()));
        let descriptor = SchemaDescriptor::new(NAME, Some("r1".to_string()));

        let waiter = {
            let fetcher = fetcher.clone();
            let descriptor = descriptor.clone();
            tokio::spawn(async move { fetcher.fetch(&descriptor).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(fetcher.fetch(&descriptor).await.is_ok());
        assert_eq!(service.lookups(), 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let service = InMemorySchemaService::new().with_schema(NAME, "r1", V1);
        let fetcher = fetcher(&service, SchemaFetcherConfig::default());
        let descriptor = SchemaDescriptor::new(NAME, Some("r1".to_string()));

        fetcher.fetch(&descriptor).await.unwrap();
        fetcher.invalidate(&descriptor).await;
        fetcher.fetch(&descriptor).await.unwrap();
        assert_eq!(service.lookups(), 2);
    }
}
