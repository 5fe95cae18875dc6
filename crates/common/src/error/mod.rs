use std::fmt;
use std::result;
use thiserror::Error;

/// Result type for operations that could result in an [AvrosubError]
pub type Result<T, E = AvrosubError> = result::Result<T, E>;

/// Avrosub Error
///
/// Every variant carries owned text only, so the type is `Clone`: a single
/// schema fetch shared by several waiters hands each of them the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvrosubError {
    #[error("Unsupported content type: {}", .0.as_deref().unwrap_or("<absent>"))]
    UnsupportedContentType(Option<String>),
    #[error("Missing message attribute: {0}")]
    MissingAttribute(&'static str),
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),
    #[error("Schema service unavailable: {0}")]
    SchemaServiceUnavailable(String),
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Failed to decode payload: {0}")]
    DecodeFailure(String),
    /// A rich value could not be written back to its wire form.
    #[error("Failed to encode value: {0}")]
    EncodeFailure(String),
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl AvrosubError {
    /// Whether redelivering the message may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AvrosubError::SchemaServiceUnavailable(_) | AvrosubError::Transport(_)
        )
    }

    /// The pipeline stage this kind of failure originates from.
    pub fn stage(&self) -> Stage {
        match self {
            AvrosubError::UnsupportedContentType(_) | AvrosubError::MissingAttribute(_) => {
                Stage::Resolve
            }
            AvrosubError::SchemaNotFound(_)
            | AvrosubError::SchemaServiceUnavailable(_)
            | AvrosubError::InvalidSchema(_) => Stage::Fetch,
            AvrosubError::UnsupportedEncoding(_) => Stage::Build,
            AvrosubError::DecodeFailure(_) | AvrosubError::EncodeFailure(_) => Stage::Decode,
            AvrosubError::MissingConfiguration(_) => Stage::Startup,
            AvrosubError::Transport(_) => Stage::Transport,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Startup,
    Transport,
    Resolve,
    Fetch,
    Build,
    Decode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Startup => "startup",
            Stage::Transport => "transport",
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Build => "build",
            Stage::Decode => "decode",
        };
        f.write_str(name)
    }
}
