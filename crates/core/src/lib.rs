pub mod config;
pub mod consumer;
pub mod content_type;
pub mod context;
pub mod conversions;
pub mod datasource;
pub mod datum;
pub mod formats;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod sink;

pub use avrosub_common::{AvrosubError, Result, Stage};

pub mod prelude {
    pub use crate::config::{ConsumerConfig, ConsumerConfigBuilder};
    pub use crate::consumer::{AckPolicy, Consumer, ConsumerStats, SettleError};
    pub use crate::context::Context;
    pub use crate::conversions::LogicalTypeRegistry;
    pub use crate::datasource::{MessageSource, PubSubPullSource, ReceivedMessage};
    pub use crate::datum::{Datum, StructuredRecord};
    pub use crate::formats::EncodingMode;
    pub use crate::message::Message;
    pub use crate::pipeline::{MessagePipeline, PipelineError};
    pub use crate::registry::{InMemorySchemaService, SchemaDescriptor, SchemaFetcher};
    pub use crate::sink::{CollectingSink, RecordSink, StdoutSink};

    pub use avrosub_common::{AvrosubError, Result};
}
