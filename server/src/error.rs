//! Mapping from service failures to HTTP responses.
//!
//! Every handler returns `Result<_, ApiError>`. An `ApiError` remembers which
//! operation failed so storage failures can say what was being attempted.
//! Bodies are always `ErrorBody` JSON:
//!
//! | `ServiceError`        | status | `message`                            |
//! |-----------------------|--------|--------------------------------------|
//! | `Validation`          | 400    | the validation message               |
//! | `Decode`              | 400    | `Invalid request body`               |
//! | `StorageUnavailable`  | 500    | `Failed to establish connect to db`  |
//! | `StorageRead`/`Write` | 500    | per operation, e.g. `Failed to save todo` |

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use todo_core::{ErrorBody, ServiceError};

/// The todo operation a request was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Create,
    Update,
    Delete,
}

impl Operation {
    fn failure_message(self) -> &'static str {
        match self {
            Operation::Fetch => "Failed to fetch todo",
            Operation::Create => "Failed to save todo",
            Operation::Update => "Failed to update todo",
            Operation::Delete => "Failed to delete todo",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Fetch => "fetch",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{op} failed: {source}")]
pub struct ApiError {
    op: Operation,
    #[source]
    source: ServiceError,
}

impl ApiError {
    pub fn new(op: Operation, source: ServiceError) -> Self {
        Self { op, source }
    }

    /// A request body that is not the JSON `op` expects.
    pub fn invalid_body(op: Operation, err: serde_json::Error) -> Self {
        Self::new(op, ServiceError::Decode(err.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        match self.source {
            ServiceError::Validation(_) | ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
            ServiceError::StorageUnavailable(_)
            | ServiceError::StorageRead(_)
            | ServiceError::StorageWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (message, error) = match &self.source {
            ServiceError::Validation(message) => (message.clone(), None),
            ServiceError::Decode(detail) => {
                ("Invalid request body".to_string(), Some(detail.clone()))
            }
            ServiceError::StorageUnavailable(e) => {
                ("Failed to establish connect to db".to_string(), Some(e.to_string()))
            }
            ServiceError::StorageRead(e) | ServiceError::StorageWrite(e) => {
                (self.op.failure_message().to_string(), Some(e.to_string()))
            }
        };
        ErrorBody { message, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(op = %self.op, error = %self.source, "request failed");
        } else {
            tracing::warn!(op = %self.op, error = %self.source, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
