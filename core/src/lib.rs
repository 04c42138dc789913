//! Core of the todo service.
//!
//! # Overview
//! - `codec` maps a `Todo` to and from the positional tuple the storage
//!   engine stores, and lists the field assignments of an update.
//! - `storage` is the connection-oriented storage seam (`Connector`,
//!   `Session`), `RemoteConnector` for a Tarantool server and
//!   `MemoryEngine`, an in-process implementation used as a test double.
//! - `service` runs the four todo operations against that seam.
//! - `client` builds `HttpRequest` values and parses `HttpResponse` values
//!   for the HTTP surface without touching the network (host-does-IO).
//!
//! # Design
//! - Nothing here knows about HTTP frameworks; the server crate maps
//!   `ServiceError` to status codes.
//! - `TodoService` holds its `Connector` behind an `Arc` and opens one short
//!   session per operation, so a single instance serves every request.

pub mod client;
pub mod codec;
pub mod error;
pub mod http;
pub mod id;
pub mod service;
pub mod storage;
pub mod types;

pub use client::TodoClient;
pub use error::{ApiError, CodecError, ServiceError, StorageError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use service::TodoService;
pub use types::{CreateTodo, Created, ErrorBody, Message, Todo, TodoList, UpdateTodo};
