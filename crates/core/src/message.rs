use std::collections::HashMap;

/// Attribute keys the publisher sets on schema-bound messages.
pub mod attributes {
    pub const CONTENT_TYPE: &str = "contentType";
    pub const SCHEMA_ENCODING: &str = "googclient_schemaencoding";
    pub const SCHEMA_NAME: &str = "googclient_schemaname";
    pub const SCHEMA_REVISION_ID: &str = "googclient_schemarevisionid";
}

/// One delivered message: opaque payload plus string attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub id: String,
    pub payload: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

impl Message {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
