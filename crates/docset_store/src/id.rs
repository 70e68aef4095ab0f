//! Document identifier.

use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a document.
///
/// Document IDs are 128-bit UUIDs. Inside documents they are stored in
/// the `_id` field as the canonical hyphenated string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId([u8; 16]);

impl DocumentId {
    /// The all-zero identifier.
    pub const NIL: Self = Self([0; 16]);

    /// Creates a document ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a new random document ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    /// Parses a document ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidId` if the string is not a UUID.
    pub fn parse(value: &str) -> StoreResult<Self> {
        Uuid::parse_str(value.trim())
            .map(|uuid| Self(uuid.into_bytes()))
            .map_err(|_| StoreError::InvalidId {
                value: value.to_string(),
            })
    }

    /// Extracts a document ID from a JSON string value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidId` for non-strings and malformed strings.
    pub fn from_value(value: &Value) -> StoreResult<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            other => Err(StoreError::InvalidId {
                value: other.to_string(),
            }),
        }
    }

    /// Returns the JSON string form stored in documents.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.to_uuid())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid().hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }
}

impl From<DocumentId> for Uuid {
    fn from(id: DocumentId) -> Self {
        id.to_uuid()
    }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self {
        id.to_value()
    }
}

impl From<[u8; 16]> for DocumentId {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_bytes(bytes)
    }
}
