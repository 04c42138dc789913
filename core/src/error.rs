//! Error types for the todo core.
//!
//! # Design
//! Each layer owns one enum:
//! - `CodecError` for tuples that do not match the record schema,
//! - `StorageError` for the storage seam, split into connection-side and
//!   operation-side failures,
//! - `ServiceError` for what a request can end in, which is what the HTTP
//!   layer maps to a status code,
//! - `ApiError` for `TodoClient` when parsing responses.

use thiserror::Error;

use crate::codec::TodoField;

/// Decoding a stored tuple into a `Todo` failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The tuple does not have exactly the expected number of fields.
    #[error("schema mismatch: expected {expected} fields, found {found}")]
    SchemaMismatch { expected: usize, found: usize },

    /// A field holds a value of the wrong runtime type.
    #[error("field `{field}` has wrong type: expected {expected}, found {found}")]
    FieldTypeMismatch {
        field: TodoField,
        expected: &'static str,
        found: &'static str,
    },

    /// The stored epoch seconds cannot be represented as a timestamp.
    #[error("created_at {0} is out of range")]
    TimestampOutOfRange(i64),
}

/// Failures reported by a `Connector` or a `Session`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The engine cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Authentication was rejected while connecting.
    #[error("access denied for user `{0}`")]
    AccessDenied(String),

    #[error("space `{0}` does not exist")]
    NoSuchSpace(String),

    #[error("index `{index}` does not exist in space `{space}`")]
    NoSuchIndex { space: String, index: String },

    /// A unique index already holds this key.
    #[error("duplicate key exists in unique index `{index}` in space `{space}`")]
    DuplicateKey { space: String, index: String },

    /// A key or an indexed field is not of an indexable type.
    #[error("field {field} has type {found}, expected a key of type {expected}")]
    KeyType {
        field: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field {field} is out of range for a tuple of {len} fields")]
    FieldOutOfRange { field: usize, len: usize },

    /// Update operations may not touch the primary key.
    #[error("attempt to modify field {field} which is part of the primary index")]
    IndexedFieldUpdate { field: usize },

    /// The server sent something that is not a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Any other error reported by the server.
    #[error("server error {code}: {message}")]
    Server { code: u32, message: String },
}

impl StorageError {
    /// `true` for failures raised while acquiring a session rather than while
    /// running an operation on one.
    pub fn is_connection(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::AccessDenied(_))
    }
}

/// The ways a single service operation can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Client input is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The request body is not valid JSON for the expected shape.
    #[error("invalid request body: {0}")]
    Decode(String),

    /// No session could be opened.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    #[error("storage read failed: {0}")]
    StorageRead(#[source] StorageError),

    #[error("storage write failed: {0}")]
    StorageWrite(#[source] StorageError),
}

/// Errors returned by `TodoClient` parse methods.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the request with 400 and this message.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The server returned any other unexpected status.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}
