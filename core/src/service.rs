//! Todo operations on top of the storage seam.
//!
//! # Overview
//! `TodoService` validates input, builds records with the codec and runs
//! exactly one storage operation per call on a fresh `Session`:
//!
//! | call        | storage operation                                  |
//! |-------------|----------------------------------------------------|
//! | `create`    | `insert` (redrawn on id collision)                 |
//! | `update`    | `update` by primary key, `title` and `completed`   |
//! | `delete`    | `delete` by primary key                            |
//! | `fetch_all` | `select` on `created`, `Le u64::MAX`, newest first |
//!
//! # Design
//! The service keeps no state between calls apart from the injected
//! `Connector` and id generator, so one instance is shared by every request.
//! A failure to open a session always ends the call with
//! `ServiceError::StorageUnavailable`.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};

use crate::codec::{self, Value};
use crate::error::{ServiceError, StorageError};
use crate::id::{IdGenerator, RandomIds};
use crate::storage::{Connector, IteratorType, Session};
use crate::types::{CreateTodo, Todo, UpdateTodo};

/// Index over `created_at` used to list todos.
pub const CREATED_INDEX: &str = "created";

/// Inserts attempted with fresh ids before a collision is reported.
pub const MAX_ID_ATTEMPTS: usize = 8;

pub const TITLE_REQUIRED: &str = "title required";
pub const INVALID_ID: &str = "invalid id";

#[derive(Clone)]
pub struct TodoService {
    connector: Arc<dyn Connector>,
    space: String,
    ids: Arc<dyn IdGenerator>,
}

impl TodoService {
    /// Service over `space`, drawing ids from `RandomIds`.
    pub fn new(connector: Arc<dyn Connector>, space: impl Into<String>) -> Self {
        Self {
            connector,
            space: space.into(),
            ids: Arc::new(RandomIds),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Store a new todo with `completed = false` and `created_at` set to the
    /// current second.
    pub async fn create(&self, input: CreateTodo) -> Result<Todo, ServiceError> {
        validate_title(&input.title)?;

        let mut session = self.session().await?;
        let created_at = Utc::now().trunc_subsecs(0);
        let mut attempt = 1;
        loop {
            let todo = Todo {
                id: self.ids.next_id(),
                title: input.title.clone(),
                completed: false,
                created_at,
                owner: input.owner.clone(),
            };
            match session.insert(&self.space, codec::encode(&todo)).await {
                Ok(_) => {
                    tracing::info!(id = todo.id, "todo created");
                    return Ok(todo);
                }
                Err(StorageError::DuplicateKey { .. }) if attempt < MAX_ID_ATTEMPTS => {
                    tracing::warn!(id = todo.id, attempt, "id collision, drawing a new id");
                    attempt += 1;
                }
                Err(e) => return Err(write_error(e)),
            }
        }
    }

    /// Overwrite `title` and `completed` of the todo with the given id.
    ///
    /// An id that matches no todo is not an error.
    pub async fn update(&self, id: &str, input: UpdateTodo) -> Result<(), ServiceError> {
        let id = parse_id(id)?;
        validate_title(&input.title)?;

        let mut session = self.session().await?;
        let ops = codec::update_ops(&input.title, input.completed);
        match session.update(&self.space, Value::Unsigned(id), ops).await {
            Ok(Some(_)) => tracing::info!(id, "todo updated"),
            Ok(None) => tracing::debug!(id, "update matched no todo"),
            Err(e) => return Err(write_error(e)),
        }
        Ok(())
    }

    /// Remove the todo with the given id. Removing a missing id succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        let id = parse_id(id)?;

        let mut session = self.session().await?;
        match session.delete(&self.space, Value::Unsigned(id)).await {
            Ok(Some(_)) => tracing::info!(id, "todo deleted"),
            Ok(None) => tracing::debug!(id, "delete matched no todo"),
            Err(e) => return Err(write_error(e)),
        }
        Ok(())
    }

    /// Every stored todo, newest first. Stored tuples that do not decode are
    /// logged and left out.
    pub async fn fetch_all(&self) -> Result<Vec<Todo>, ServiceError> {
        let mut session = self.session().await?;
        let tuples = session
            .select(
                &self.space,
                CREATED_INDEX,
                Value::Unsigned(u64::MAX),
                IteratorType::Le,
            )
            .await
            .map_err(read_error)?;

        let mut todos = Vec::with_capacity(tuples.len());
        for tuple in &tuples {
            match codec::decode(tuple) {
                Ok(todo) => todos.push(todo),
                Err(e) => tracing::warn!(error = %e, "skipping malformed todo record"),
            }
        }
        Ok(todos)
    }

    async fn session(&self) -> Result<Box<dyn Session>, ServiceError> {
        self.connector.connect().await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to storage");
            ServiceError::StorageUnavailable(e)
        })
    }
}

/// Parse a path id. Surrounding whitespace is ignored.
pub fn parse_id(raw: &str) -> Result<u64, ServiceError> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::Validation(INVALID_ID.to_string()))
}

fn validate_title(title: &str) -> Result<(), ServiceError> {
    if title.trim().is_empty() {
        return Err(ServiceError::Validation(TITLE_REQUIRED.to_string()));
    }
    Ok(())
}

fn write_error(e: StorageError) -> ServiceError {
    if e.is_connection() {
        ServiceError::StorageUnavailable(e)
    } else {
        ServiceError::StorageWrite(e)
    }
}

fn read_error(e: StorageError) -> ServiceError {
    if e.is_connection() {
        ServiceError::StorageUnavailable(e)
    } else {
        ServiceError::StorageRead(e)
    }
}
