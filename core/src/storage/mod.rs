//! Storage client seam.
//!
//! # Overview
//! The service talks to storage through two object-safe traits:
//! - `Connector` is the long-lived, process-wide handle. It is created once
//!   at startup and shared behind an `Arc`.
//! - `Session` is a short-lived, connection-scoped handle opened per
//!   operation. It exposes the four primitives the service needs: insert,
//!   update by primary key, select over an index and delete by primary key.
//!
//! `RemoteConnector` speaks the Tarantool binary protocol to a database
//! server. `MemoryEngine` implements the same contract in-process.

mod memory;
mod remote;

pub use memory::{IndexDef, KeyKind, MemoryConnector, MemoryEngine, SpaceDef};
pub use remote::RemoteConnector;

use std::fmt;

use async_trait::async_trait;

use crate::codec::{Tuple, UpdateOp, Value};
use crate::error::StorageError;

/// Traversal direction and bound for `Session::select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorType {
    /// Keys equal to the search key, ascending.
    Eq,
    /// Keys at or below the search key, descending.
    Le,
}

/// User name and password presented on connect.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Process-wide storage handle.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session. Failures here are connection failures and never
    /// operation failures.
    async fn connect(&self) -> Result<Box<dyn Session>, StorageError>;
}

/// A connection-scoped session.
#[async_trait]
pub trait Session: Send {
    /// Insert `tuple`, failing if its primary key already exists. Returns the
    /// stored tuple.
    async fn insert(&mut self, space: &str, tuple: Tuple) -> Result<Tuple, StorageError>;

    /// Apply `ops` to the tuple with primary key `key`. Returns the updated
    /// tuple, or `None` when no tuple has that key.
    async fn update(
        &mut self,
        space: &str,
        key: Value,
        ops: Vec<UpdateOp>,
    ) -> Result<Option<Tuple>, StorageError>;

    /// Select tuples through `index` starting from `key` in the direction
    /// given by `iterator`.
    async fn select(
        &mut self,
        space: &str,
        index: &str,
        key: Value,
        iterator: IteratorType,
    ) -> Result<Vec<Tuple>, StorageError>;

    /// Delete the tuple with primary key `key`, returning it if it existed.
    async fn delete(&mut self, space: &str, key: Value) -> Result<Option<Tuple>, StorageError>;
}
