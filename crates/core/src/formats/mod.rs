use std::fmt;
use std::str::FromStr;

use avrosub_common::AvrosubError;

/// How a payload is serialized, taken from the `googclient_schemaencoding`
/// attribute. Values are matched exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncodingMode {
    #[default]
    Binary,
    Json,
}

impl FromStr for EncodingMode {
    type Err = AvrosubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BINARY" => Ok(Self::Binary),
            "JSON" => Ok(Self::Json),
            _ => Err(Self::Err::UnsupportedEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingMode::Binary => f.write_str("BINARY"),
            EncodingMode::Json => f.write_str("JSON"),
        }
    }
}

pub mod decoders;
