use std::str::FromStr;
use std::sync::Arc;

use avrosub_common::Result;

use crate::conversions::LogicalTypeRegistry;
use crate::datum::Datum;
use crate::formats::EncodingMode;
use crate::registry::CompiledSchema;

pub trait Decoder: Send + Sync {
    /// Decodes one payload into a non-null record.
    fn decode(&self, payload: &[u8]) -> Result<Datum>;
}

/// Builds decoders bound to a compiled schema, an encoding and the
/// process-wide conversion table.
#[derive(Debug, Clone)]
pub struct DecoderFactory {
    conversions: Arc<LogicalTypeRegistry>,
}

impl DecoderFactory {
    pub fn new(conversions: Arc<LogicalTypeRegistry>) -> Self {
        Self { conversions }
    }

    pub fn conversions(&self) -> &Arc<LogicalTypeRegistry> {
        &self.conversions
    }

    /// Builds a decoder from the raw encoding attribute value.
    pub fn build(&self, schema: Arc<CompiledSchema>, encoding: &str) -> Result<Arc<dyn Decoder>> {
        let encoding = EncodingMode::from_str(encoding)?;
        Ok(self.build_for_mode(schema, encoding))
    }

    pub fn build_for_mode(
        &self,
        schema: Arc<CompiledSchema>,
        encoding: EncodingMode,
    ) -> Arc<dyn Decoder> {
        Arc::new(avro::AvroDecoder::new(
            schema,
            encoding,
            self.conversions.clone(),
        ))
    }
}

pub mod avro;
pub mod json;
pub mod utils;
