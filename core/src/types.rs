//! Domain and wire DTOs for the todo service.
//!
//! # Design
//! `Todo` is the stored record and the JSON element returned by the list
//! endpoint. Request payloads (`CreateTodo`, `UpdateTodo`) and response
//! envelopes (`TodoList`, `Created`, `Message`, `ErrorBody`) are shared by the
//! server and by `TodoClient`, so both ends of the HTTP surface agree on one
//! schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single todo item.
///
/// `created_at` is stored with whole-second precision; records produced by
/// `TodoService::create` are truncated accordingly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: u64,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Request payload for creating a new todo. `owner` is passed through to the
/// stored record untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTodo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl CreateTodo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            owner: None,
        }
    }
}

/// Request payload for updating an existing todo. Both fields are written on
/// every update; `completed` defaults to `false` when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTodo {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

/// Envelope returned by `GET /todo/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub data: Vec<Todo>,
}

/// Body returned by `POST /todo/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
    pub message: String,
    pub id: u64,
}

/// Body returned by update and delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

/// Body of every 4xx/5xx response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
