//! Positional tuple encoding for `Todo` records.
//!
//! # Design
//! The storage engine knows nothing about todos: it stores `Tuple`s of
//! primitive `Value`s and indexes them by position. This module is the one
//! place that knows the layout:
//!
//! ```text
//! [ id: Unsigned, title: Str, completed: Bool, created_at: Integer, owner: Str | Nil ]
//! ```
//!
//! `created_at` is kept as Unix epoch seconds. A missing owner is `Nil`, so
//! every stored record is exactly `FIELD_COUNT` wide and `decode` treats any
//! other width as schema drift. MessagePack has no signed-ness for positive
//! integers, so a non-negative `created_at` read back over the wire arrives as
//! `Unsigned` and is accepted.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::CodecError;
use crate::types::Todo;

/// A primitive field value as stored by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Unsigned(u64),
    Integer(i64),
    Bool(bool),
    Str(String),
    /// A value read from storage that has no counterpart above. Carries the
    /// wire type name.
    Unsupported(&'static str),
}

impl Value {
    /// Runtime type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Unsigned(_) => "unsigned",
            Value::Integer(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Unsupported(name) => name,
        }
    }
}

pub type Tuple = Vec<Value>;

/// A single field operation applied by `Session::update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    /// Overwrite the field at `field` with `value`.
    Assign { field: usize, value: Value },
}

/// Positions of the todo fields inside a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoField {
    Id = 0,
    Title = 1,
    Completed = 2,
    CreatedAt = 3,
    Owner = 4,
}

impl TodoField {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TodoField::Id => "id",
            TodoField::Title => "title",
            TodoField::Completed => "completed",
            TodoField::CreatedAt => "created_at",
            TodoField::Owner => "owner",
        }
    }
}

impl fmt::Display for TodoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const FIELD_COUNT: usize = 5;

/// Lay out `todo` in storage order.
pub fn encode(todo: &Todo) -> Tuple {
    vec![
        Value::Unsigned(todo.id),
        Value::Str(todo.title.clone()),
        Value::Bool(todo.completed),
        Value::Integer(todo.created_at.timestamp()),
        match &todo.owner {
            Some(owner) => Value::Str(owner.clone()),
            None => Value::Nil,
        },
    ]
}

/// Rebuild a `Todo` from a stored tuple, rejecting any tuple that `encode`
/// could not have produced.
pub fn decode(tuple: &[Value]) -> Result<Todo, CodecError> {
    if tuple.len() != FIELD_COUNT {
        return Err(CodecError::SchemaMismatch {
            expected: FIELD_COUNT,
            found: tuple.len(),
        });
    }

    let id = match &tuple[TodoField::Id.index()] {
        Value::Unsigned(v) => *v,
        other => return Err(mismatch(TodoField::Id, "unsigned", other)),
    };
    let title = match &tuple[TodoField::Title.index()] {
        Value::Str(v) => v.clone(),
        other => return Err(mismatch(TodoField::Title, "string", other)),
    };
    let completed = match &tuple[TodoField::Completed.index()] {
        Value::Bool(v) => *v,
        other => return Err(mismatch(TodoField::Completed, "boolean", other)),
    };
    let created_at = match &tuple[TodoField::CreatedAt.index()] {
        Value::Integer(secs) => timestamp(*secs)?,
        value @ Value::Unsigned(secs) => {
            let secs = i64::try_from(*secs)
                .map_err(|_| mismatch(TodoField::CreatedAt, "integer", value))?;
            timestamp(secs)?
        }
        other => return Err(mismatch(TodoField::CreatedAt, "integer", other)),
    };
    let owner = match &tuple[TodoField::Owner.index()] {
        Value::Str(v) => Some(v.clone()),
        Value::Nil => None,
        other => return Err(mismatch(TodoField::Owner, "string or nil", other)),
    };

    Ok(Todo {
        id,
        title,
        completed,
        created_at,
        owner,
    })
}

/// Field assignments for an update. Only `title` and `completed` are ever
/// written after creation.
pub fn update_ops(title: &str, completed: bool) -> Vec<UpdateOp> {
    vec![
        UpdateOp::Assign {
            field: TodoField::Title.index(),
            value: Value::Str(title.to_string()),
        },
        UpdateOp::Assign {
            field: TodoField::Completed.index(),
            value: Value::Bool(completed),
        },
    ]
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CodecError> {
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or(CodecError::TimestampOutOfRange(secs))
}

fn mismatch(field: TodoField, expected: &'static str, found: &Value) -> CodecError {
    CodecError::FieldTypeMismatch {
        field,
        expected,
        found: found.type_name(),
    }
}
