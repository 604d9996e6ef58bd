//! Document boundary.
//!
//! The engine never looks inside a document. All it needs is a way to build
//! a blank one, and to move one to and from an opaque byte payload. Two
//! implementations ship with the crate: [`RawDocument`] stores bytes as-is,
//! [`JsonDocument`] stores a flat JSON object of fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// errors raised while encoding or decoding a document payload
#[derive(Debug, Error)]
pub enum DocumentError {
    /// JSON serialization or deserialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// the payload is not a valid encoding for this document type
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// result type alias for document codec operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// A value the store can persist as bytes.
pub trait Document: Send + Sync + Sized + 'static {
    /// A blank document. Used for fresh instances and for keys with no payload.
    fn empty() -> Self;

    /// Encode the document into its stored payload.
    fn to_bytes(&self) -> DocumentResult<Vec<u8>>;

    /// Decode a stored payload.
    fn from_bytes(bytes: &[u8]) -> DocumentResult<Self>;
}

/// A document that is just its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawDocument(Vec<u8>);

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// replace the contents
    pub fn set(&mut self, bytes: impl Into<Vec<u8>>) {
        self.0 = bytes.into();
    }
}

impl Document for RawDocument {
    fn empty() -> Self {
        Self::default()
    }

    fn to_bytes(&self) -> DocumentResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn from_bytes(bytes: &[u8]) -> DocumentResult<Self> {
        Ok(Self(bytes.to_vec()))
    }
}

/// a document made of named JSON fields
///
/// Stored as a JSON object. BTreeMap keeps the field order stable, so equal
/// documents always encode to equal payloads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonDocument {
    fields: BTreeMap<String, Value>,
}

impl JsonDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// create a document from a JSON value (must be an object)
    pub fn from_value(value: Value) -> DocumentResult<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                fields: map.into_iter().collect(),
            }),
            other => Err(DocumentError::Malformed(format!(
                "document must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// get a field value by name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// set a field, returning the previous value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// builder-style [`set`](Self::set)
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Document for JsonDocument {
    fn empty() -> Self {
        Self::default()
    }

    fn to_bytes(&self) -> DocumentResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.fields)?)
    }

    fn from_bytes(bytes: &[u8]) -> DocumentResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }
}
