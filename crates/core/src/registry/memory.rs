use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};

use super::{GetSchemaRequest, SchemaDefinition, SchemaServiceClient, SchemaServiceConnector};

#[derive(Default)]
struct Inner {
    schemas: RwLock<HashMap<String, SchemaDefinition>>,
    latency: Mutex<Duration>,
    failure: Mutex<Option<AvrosubError>>,
    connections_opened: AtomicUsize,
    open_connections: AtomicUsize,
    lookups: AtomicUsize,
}

/// A schema service held in memory. Used by tests and local demos.
///
/// Each registered revision is addressable as `name@revision`; the most
/// recently registered revision also answers lookups for the bare name.
#[derive(Clone, Default)]
pub struct InMemorySchemaService {
    inner: Arc<Inner>,
}

impl InMemorySchemaService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(self, name: &str, revision_id: &str, definition: &str) -> Self {
        self.insert_schema(name, revision_id, definition);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn insert_schema(&self, name: &str, revision_id: &str, definition: &str) {
        let schema = SchemaDefinition::avro(name, Some(revision_id.to_string()), definition);
        self.insert_definition(&format!("{name}@{revision_id}"), schema.clone());
        self.insert_definition(name, schema);
    }

    /// Registers a raw definition under an exact lookup key.
    pub fn insert_definition(&self, key: &str, definition: SchemaDefinition) {
        self.inner
            .schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), definition);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Makes every lookup fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<AvrosubError>) {
        *self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn connections_opened(&self) -> usize {
        self.inner.connections_opened.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.inner.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaServiceConnector for InMemorySchemaService {
    async fn connect(&self) -> Result<Box<dyn SchemaServiceClient>> {
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryClient {
            inner: self.inner.clone(),
        }))
    }
}

struct InMemoryClient {
    inner: Arc<Inner>,
}

impl Drop for InMemoryClient {
    fn drop(&mut self) {
        self.inner.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SchemaServiceClient for InMemoryClient {
    async fn get_schema(&self, request: &GetSchemaRequest) -> Result<SchemaDefinition> {
        self.inner.lookups.fetch_add(1, Ordering::SeqCst);

        let latency = *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }

        self.inner
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.name)
            .cloned()
            .ok_or_else(|| AvrosubError::SchemaNotFound(request.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{SchemaDescriptor, SchemaView};

    #[tokio::test]
    async fn test_revisions_and_latest() {
        let service = InMemorySchemaService::new()
            .with_schema("projects/p/schemas/s", "r1", r#""string""#)
            .with_schema("projects/p/schemas/s", "r2", r#""long""#);
        let client = service.connect().await.unwrap();
        assert_eq!(service.open_connections(), 1);

        let pinned = client
            .get_schema(&GetSchemaRequest::full(&SchemaDescriptor::new(
                "projects/p/schemas/s",
                Some("r1".to_string()),
            )))
            .await
            .unwrap();
        assert_eq!(pinned.definition.as_deref(), Some(r#""string""#));

        let latest = client
            .get_schema(&GetSchemaRequest {
                name: "projects/p/schemas/s".to_string(),
                view: SchemaView::Full,
            })
            .await
            .unwrap();
        assert_eq!(latest.revision_id.as_deref(), Some("r2"));

        drop(client);
        assert_eq!(service.open_connections(), 0);
        assert_eq!(service.lookups(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let service = InMemorySchemaService::new().with_schema("n", "r1", r#""string""#);
        service.fail_with(Some(AvrosubError::SchemaServiceUnavailable(
            "down".to_string(),
        )));
        let client = service.connect().await.unwrap();
        let request = GetSchemaRequest {
            name: "n@r1".to_string(),
            view: SchemaView::Full,
        };
        assert!(client.get_schema(&request).await.is_err());

        service.fail_with(None);
        assert!(client.get_schema(&request).await.is_ok());
    }
}
