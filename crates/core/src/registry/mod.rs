use std::fmt;

use apache_avro::Schema;
use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};
use serde::Deserialize;

use crate::conversions::retain_fixed_uuids;
use crate::formats::decoders::utils::{collect_named_schemas, NamedSchemas};

pub mod fetcher;
pub mod memory;
pub mod pubsub;

pub use fetcher::{SchemaFetcher, SchemaFetcherConfig};
pub use memory::InMemorySchemaService;
pub use pubsub::PubSubSchemaConnector;

/// Identifies one schema in the registry. A `None` version means the
/// latest revision at lookup time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaDescriptor {
    pub name: String,
    pub version: Option<String>,
}

impl SchemaDescriptor {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Builds a descriptor, expanding a bare schema id into
    /// `projects/{project}/schemas/{id}`. Any present version pins the
    /// lookup, an empty one included.
    pub fn qualified(project_id: &str, name: &str, version: Option<String>) -> Self {
        let name = if name.starts_with("projects/") {
            name.to_string()
        } else {
            format!("projects/{project_id}/schemas/{name}")
        };
        Self { name, version }
    }

    /// `name@version`, or just `name` when the version is open.
    pub fn lookup_key(&self) -> String {
        match &self.version {
            Some(version) => format!("{}@{}", self.name, version),
            None => self.name.clone(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.version.is_some()
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lookup_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaView {
    Basic,
    #[default]
    Full,
}

impl SchemaView {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaView::Basic => "BASIC",
            SchemaView::Full => "FULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSchemaRequest {
    /// Fully qualified name, optionally suffixed with `@revision`.
    pub name: String,
    pub view: SchemaView,
}

impl GetSchemaRequest {
    pub fn full(descriptor: &SchemaDescriptor) -> Self {
        Self {
            name: descriptor.lookup_key(),
            view: SchemaView::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaType {
    TypeUnspecified,
    ProtocolBuffer,
    Avro,
    #[serde(other)]
    Unknown,
}

/// A schema resource as returned by the schema service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    pub definition: Option<String>,
    #[serde(default)]
    pub revision_id: Option<String>,
}

impl SchemaDefinition {
    pub fn avro(name: impl Into<String>, revision_id: Option<String>, definition: &str) -> Self {
        Self {
            name: name.into(),
            schema_type: SchemaType::Avro,
            definition: Some(definition.to_string()),
            revision_id,
        }
    }
}

/// A parsed Avro schema and the named types needed to resolve references
/// inside it. Immutable once built and shared between decoders.
#[derive(Debug)]
pub struct CompiledSchema {
    pub descriptor: SchemaDescriptor,
    pub revision_id: Option<String>,
    pub definition: String,
    pub schema: Schema,
    pub names: NamedSchemas,
}

impl CompiledSchema {
    pub fn compile(descriptor: SchemaDescriptor, definition: String) -> Result<Self> {
        let invalid = |e: &dyn fmt::Display| {
            AvrosubError::InvalidSchema(format!("{descriptor} is not a valid Avro schema: {e}"))
        };
        let mut document: serde_json::Value =
            serde_json::from_str(&definition).map_err(|e| invalid(&e))?;
        retain_fixed_uuids(&mut document);
        let schema = Schema::parse(&document).map_err(|e| invalid(&e))?;
        let names = collect_named_schemas(&schema);
        Ok(Self {
            descriptor,
            revision_id: None,
            definition,
            schema,
            names,
        })
    }

    /// Compiles a registry response, rejecting non-Avro schema types.
    pub fn from_definition(
        descriptor: SchemaDescriptor,
        definition: SchemaDefinition,
    ) -> Result<Self> {
        if definition.schema_type != SchemaType::Avro {
            return Err(AvrosubError::InvalidSchema(format!(
                "{descriptor} has type {:?}, expected AVRO",
                definition.schema_type
            )));
        }
        let text = definition.definition.ok_or_else(|| {
            AvrosubError::InvalidSchema(format!("{descriptor} has no definition"))
        })?;
        let mut compiled = Self::compile(descriptor, text)?;
        compiled.revision_id = definition.revision_id;
        Ok(compiled)
    }
}

/// Opens scoped connections to a schema service.
#[async_trait]
pub trait SchemaServiceConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SchemaServiceClient>>;
}

/// One open connection. Released when dropped.
#[async_trait]
pub trait SchemaServiceClient: Send + Sync {
    async fn get_schema(&self, request: &GetSchemaRequest) -> Result<SchemaDefinition>;
}
