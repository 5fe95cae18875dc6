use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};

use crate::formats::decoders::Decoder;
use crate::formats::EncodingMode;
use crate::message::attributes;

pub const AVRO_BINARY_MIME: &str = "application/vnd.apache.avro";
pub const AVRO_JSON_MIME: &str = "application/vnd.apache.avro+json";

/// The decode-relevant attributes of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHeaders {
    pub content_type: Option<String>,
    /// Raw encoding attribute; `BINARY` when the publisher set none.
    pub encoding: String,
    pub schema_name: Option<String>,
    pub schema_revision: Option<String>,
}

impl ContentHeaders {
    pub fn from_attributes(attrs: &HashMap<String, String>) -> Self {
        Self {
            content_type: attrs.get(attributes::CONTENT_TYPE).cloned(),
            encoding: attrs
                .get(attributes::SCHEMA_ENCODING)
                .cloned()
                .unwrap_or_else(|| EncodingMode::default().to_string()),
            schema_name: attrs.get(attributes::SCHEMA_NAME).cloned(),
            schema_revision: attrs.get(attributes::SCHEMA_REVISION_ID).cloned(),
        }
    }
}

/// Builds a decoder for one decoder family, fetching whatever the family
/// needs (for Avro, the schema named in the headers).
#[async_trait]
pub trait DecoderBuilder: Send + Sync {
    async fn build(&self, headers: &ContentHeaders) -> Result<Arc<dyn Decoder>>;
}

pub struct ResolvedContent {
    pub builder: Arc<dyn DecoderBuilder>,
    pub headers: ContentHeaders,
}

impl fmt::Debug for ResolvedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedContent")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Maps MIME identifiers to decoder builders. Matching ignores case.
#[derive(Clone, Default)]
pub struct ContentTypeResolver {
    builders: HashMap<String, Arc<dyn DecoderBuilder>>,
}

impl ContentTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver serving both Avro MIME types with `builder`.
    pub fn avro_default(builder: Arc<dyn DecoderBuilder>) -> Self {
        let mut resolver = Self::new();
        resolver.register(AVRO_BINARY_MIME, builder.clone());
        resolver.register(AVRO_JSON_MIME, builder);
        resolver
    }

    pub fn register(&mut self, mime: &str, builder: Arc<dyn DecoderBuilder>) -> &mut Self {
        self.builders.insert(mime.to_ascii_lowercase(), builder);
        self
    }

    pub fn supports(&self, mime: &str) -> bool {
        self.builders.contains_key(&mime.to_ascii_lowercase())
    }

    pub fn resolve(&self, attrs: &HashMap<String, String>) -> Result<ResolvedContent> {
        let headers = ContentHeaders::from_attributes(attrs);
        let builder = headers
            .content_type
            .as_deref()
            .and_then(|mime| self.builders.get(&mime.to_ascii_lowercase()))
            .cloned()
            .ok_or_else(|| AvrosubError::UnsupportedContentType(headers.content_type.clone()))?;

        Ok(ResolvedContent { builder, headers })
    }
}

impl fmt::Debug for ContentTypeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut mimes: Vec<_> = self.builders.keys().collect();
        mimes.sort();
        f.debug_struct("ContentTypeResolver")
            .field("mime_types", &mimes)
            .finish()
    }
}
