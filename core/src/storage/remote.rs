//! Tarantool binary protocol (IPROTO) client.
//!
//! # Design
//! `RemoteConnector` opens one TCP connection per `connect`. It reads the
//! 128-byte greeting, authenticates with `chap-sha1` and hands back a
//! `RemoteSession` that runs one request at a time on that socket.
//!
//! Every frame is a MessagePack `uint32` length followed by a header map and
//! a body map, both keyed by small integer codes. Responses carry the
//! request's sync number; a mismatch is a protocol error.
//!
//! Space and index names are resolved through the `_vspace` and `_vindex`
//! system views and cached in the connector, so a name costs one lookup per
//! process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rmpv::Value as Wire;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;

use super::{Connector, Credentials, IteratorType, Session};
use crate::codec::{Tuple, UpdateOp, Value};
use crate::error::StorageError;

const GREETING_LEN: usize = 128;
const SALT_LEN: usize = 20;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

mod request {
    pub const SELECT: u64 = 0x01;
    pub const INSERT: u64 = 0x02;
    pub const UPDATE: u64 = 0x04;
    pub const DELETE: u64 = 0x05;
    pub const AUTH: u64 = 0x07;
}

mod keys {
    pub const REQUEST_TYPE: u64 = 0x00;
    pub const SYNC: u64 = 0x01;
    pub const SPACE_ID: u64 = 0x10;
    pub const INDEX_ID: u64 = 0x11;
    pub const LIMIT: u64 = 0x12;
    pub const OFFSET: u64 = 0x13;
    pub const ITERATOR: u64 = 0x14;
    pub const KEY: u64 = 0x20;
    pub const TUPLE: u64 = 0x21;
    pub const USER_NAME: u64 = 0x23;
    pub const DATA: u64 = 0x30;
    pub const ERROR: u64 = 0x31;
}

const ERROR_FLAG: u64 = 0x8000;
const ER_TUPLE_FOUND: u32 = 3;
const ER_NO_SUCH_SPACE: u32 = 36;

const VSPACE: u64 = 281;
const VINDEX: u64 = 289;
/// Both system views are indexed by name at position 2.
const BY_NAME: u64 = 2;
const PRIMARY: u64 = 0;

#[derive(Default)]
struct Schema {
    spaces: HashMap<String, u64>,
    indexes: HashMap<(u64, String), u64>,
}

/// `Connector` for a Tarantool server at `addr` (`host:port`).
#[derive(Clone)]
pub struct RemoteConnector {
    addr: String,
    credentials: Credentials,
    timeout: Duration,
    // TODO: clear cached ids when a response carries a newer schema version.
    schema: Arc<RwLock<Schema>>,
}

impl RemoteConnector {
    pub fn new(addr: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            addr: addr.into(),
            credentials,
            timeout: DEFAULT_TIMEOUT,
            schema: Arc::new(RwLock::new(Schema::default())),
        }
    }

    /// Bound on connecting, on the handshake and on every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for RemoteConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, StorageError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                StorageError::Unavailable(format!("connecting to {} timed out", self.addr))
            })?
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.addr)))?;

        let mut conn = Connection {
            stream,
            sync: 0,
            timeout: self.timeout,
        };
        let salt = conn.greeting().await?;
        if !self.credentials.user.is_empty() {
            conn.authenticate(&self.credentials, &salt).await?;
        }
        tracing::debug!(addr = %self.addr, user = %self.credentials.user, "storage session opened");

        Ok(Box::new(RemoteSession {
            conn,
            schema: Arc::clone(&self.schema),
        }))
    }
}

struct Connection {
    stream: TcpStream,
    sync: u64,
    timeout: Duration,
}

impl Connection {
    /// Read the server greeting and return the authentication salt.
    async fn greeting(&mut self) -> Result<Vec<u8>, StorageError> {
        let mut greeting = [0u8; GREETING_LEN];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut greeting))
            .await
            .map_err(|_| StorageError::Unavailable("greeting timed out".to_string()))?
            .map_err(|e| StorageError::Unavailable(format!("reading greeting: {e}")))?;
        parse_greeting(&greeting)
    }

    async fn authenticate(
        &mut self,
        credentials: &Credentials,
        salt: &[u8],
    ) -> Result<(), StorageError> {
        let body = map(vec![
            (keys::USER_NAME, Wire::from(credentials.user.as_str())),
            (
                keys::TUPLE,
                Wire::Array(vec![
                    Wire::from("chap-sha1"),
                    Wire::Binary(scramble(salt, &credentials.password).to_vec()),
                ]),
            ),
        ]);
        match self.call(request::AUTH, body).await {
            Ok(_) => Ok(()),
            Err(StorageError::Server { message, .. }) => {
                tracing::warn!(user = %credentials.user, %message, "storage authentication failed");
                Err(StorageError::AccessDenied(credentials.user.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Send one request and wait for its response body. Transport failures
    /// are reported as `Unavailable`, error responses as `Server`.
    async fn call(&mut self, kind: u64, body: Wire) -> Result<Wire, StorageError> {
        self.sync += 1;
        let sync = self.sync;
        let header = map(vec![
            (keys::REQUEST_TYPE, Wire::from(kind)),
            (keys::SYNC, Wire::from(sync)),
        ]);
        let stream = &mut self.stream;
        let exchange = async move {
            write_frame(&mut *stream, &header, &body).await?;
            read_frame(stream).await
        };
        let (header, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| StorageError::Unavailable("request timed out".to_string()))??;

        if field(&header, keys::SYNC).and_then(Wire::as_u64) != Some(sync) {
            return Err(StorageError::Protocol(format!("response does not match request {sync}")));
        }
        let code = field(&header, keys::REQUEST_TYPE)
            .and_then(Wire::as_u64)
            .ok_or_else(|| StorageError::Protocol("response without a status code".to_string()))?;
        if code & ERROR_FLAG != 0 {
            let message = field(&body, keys::ERROR)
                .and_then(Wire::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(StorageError::Server {
                code: (code & !ERROR_FLAG) as u32,
                message,
            });
        }
        Ok(body)
    }

    async fn select(
        &mut self,
        space_id: u64,
        index_id: u64,
        key: Vec<Wire>,
        iterator: IteratorType,
    ) -> Result<Vec<Wire>, StorageError> {
        let body = map(vec![
            (keys::SPACE_ID, Wire::from(space_id)),
            (keys::INDEX_ID, Wire::from(index_id)),
            (keys::LIMIT, Wire::from(u32::MAX)),
            (keys::OFFSET, Wire::from(0u64)),
            (keys::ITERATOR, Wire::from(iterator_code(iterator))),
            (keys::KEY, Wire::Array(key)),
        ]);
        let body = self.call(request::SELECT, body).await?;
        data(body)
    }
}

struct RemoteSession {
    conn: Connection,
    schema: Arc<RwLock<Schema>>,
}

impl RemoteSession {
    async fn space_id(&mut self, space: &str) -> Result<u64, StorageError> {
        let cached = self.schema.read().await.spaces.get(space).copied();
        if let Some(id) = cached {
            return Ok(id);
        }
        let rows = self
            .conn
            .select(VSPACE, BY_NAME, vec![Wire::from(space)], IteratorType::Eq)
            .await?;
        let id = match rows.first() {
            Some(row) => row_u64(row, 0)?,
            None => return Err(StorageError::NoSuchSpace(space.to_string())),
        };
        self.schema.write().await.spaces.insert(space.to_string(), id);
        Ok(id)
    }

    async fn index_id(
        &mut self,
        space_id: u64,
        space: &str,
        index: &str,
    ) -> Result<u64, StorageError> {
        let cache_key = (space_id, index.to_string());
        let cached = self.schema.read().await.indexes.get(&cache_key).copied();
        if let Some(id) = cached {
            return Ok(id);
        }
        let rows = self
            .conn
            .select(
                VINDEX,
                BY_NAME,
                vec![Wire::from(space_id), Wire::from(index)],
                IteratorType::Eq,
            )
            .await?;
        let id = match rows.first() {
            Some(row) => row_u64(row, 1)?,
            None => {
                return Err(StorageError::NoSuchIndex {
                    space: space.to_string(),
                    index: index.to_string(),
                })
            }
        };
        self.schema.write().await.indexes.insert(cache_key, id);
        Ok(id)
    }
}

#[async_trait]
impl Session for RemoteSession {
    async fn insert(&mut self, space: &str, tuple: Tuple) -> Result<Tuple, StorageError> {
        let space_id = self.space_id(space).await?;
        let body = map(vec![
            (keys::SPACE_ID, Wire::from(space_id)),
            (keys::TUPLE, to_wire_tuple(&tuple)?),
        ]);
        let body = self
            .conn
            .call(request::INSERT, body)
            .await
            .map_err(|e| operation_error(e, space))?;
        match data(body)?.first() {
            Some(row) => from_wire_tuple(row),
            None => Ok(tuple),
        }
    }

    async fn update(
        &mut self,
        space: &str,
        key: Value,
        ops: Vec<UpdateOp>,
    ) -> Result<Option<Tuple>, StorageError> {
        let space_id = self.space_id(space).await?;
        let ops = ops
            .iter()
            .map(|op| match op {
                UpdateOp::Assign { field, value } => Ok(Wire::Array(vec![
                    Wire::from("="),
                    Wire::from(*field as u64),
                    to_wire(value)?,
                ])),
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        let body = map(vec![
            (keys::SPACE_ID, Wire::from(space_id)),
            (keys::INDEX_ID, Wire::from(PRIMARY)),
            (keys::KEY, Wire::Array(vec![to_wire(&key)?])),
            (keys::TUPLE, Wire::Array(ops)),
        ]);
        let body = self
            .conn
            .call(request::UPDATE, body)
            .await
            .map_err(|e| operation_error(e, space))?;
        data(body)?.first().map(from_wire_tuple).transpose()
    }

    async fn select(
        &mut self,
        space: &str,
        index: &str,
        key: Value,
        iterator: IteratorType,
    ) -> Result<Vec<Tuple>, StorageError> {
        let space_id = self.space_id(space).await?;
        let index_id = self.index_id(space_id, space, index).await?;
        let rows = self
            .conn
            .select(space_id, index_id, vec![to_wire(&key)?], iterator)
            .await
            .map_err(|e| operation_error(e, space))?;
        rows.iter().map(from_wire_tuple).collect()
    }

    async fn delete(&mut self, space: &str, key: Value) -> Result<Option<Tuple>, StorageError> {
        let space_id = self.space_id(space).await?;
        let body = map(vec![
            (keys::SPACE_ID, Wire::from(space_id)),
            (keys::INDEX_ID, Wire::from(PRIMARY)),
            (keys::KEY, Wire::Array(vec![to_wire(&key)?])),
        ]);
        let body = self
            .conn
            .call(request::DELETE, body)
            .await
            .map_err(|e| operation_error(e, space))?;
        data(body)?.first().map(from_wire_tuple).transpose()
    }
}

fn operation_error(e: StorageError, space: &str) -> StorageError {
    match e {
        StorageError::Server {
            code: ER_TUPLE_FOUND,
            ..
        } => StorageError::DuplicateKey {
            space: space.to_string(),
            index: "primary".to_string(),
        },
        StorageError::Server {
            code: ER_NO_SUCH_SPACE,
            ..
        } => StorageError::NoSuchSpace(space.to_string()),
        other => other,
    }
}

fn parse_greeting(greeting: &[u8]) -> Result<Vec<u8>, StorageError> {
    let (banner, salt_line) = greeting.split_at(GREETING_LEN / 2);
    if !banner.starts_with(b"Tarantool") {
        return Err(StorageError::Protocol("unexpected server greeting".to_string()));
    }
    let encoded = std::str::from_utf8(salt_line)
        .map_err(|_| StorageError::Protocol("salt is not ASCII".to_string()))?
        .trim();
    let salt = STANDARD
        .decode(encoded)
        .map_err(|e| StorageError::Protocol(format!("salt: {e}")))?;
    if salt.len() < SALT_LEN {
        return Err(StorageError::Protocol(format!("salt is {} bytes", salt.len())));
    }
    Ok(salt)
}

/// `sha1(password) XOR sha1(salt[..20] ++ sha1(sha1(password)))`
fn scramble(salt: &[u8], password: &str) -> [u8; SALT_LEN] {
    let step1 = Sha1::digest(password.as_bytes());
    let step2 = Sha1::digest(step1);
    let mut hasher = Sha1::new();
    hasher.update(&salt[..SALT_LEN]);
    hasher.update(step2);
    let step3 = hasher.finalize();

    let mut out = [0u8; SALT_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = step1[i] ^ step3[i];
    }
    out
}

fn iterator_code(iterator: IteratorType) -> u64 {
    match iterator {
        IteratorType::Eq => 0,
        IteratorType::Le => 4,
    }
}

fn map(entries: Vec<(u64, Wire)>) -> Wire {
    Wire::Map(entries.into_iter().map(|(k, v)| (Wire::from(k), v)).collect())
}

fn field(map: &Wire, key: u64) -> Option<&Wire> {
    map.as_map()?
        .iter()
        .find(|(k, _)| k.as_u64() == Some(key))
        .map(|(_, v)| v)
}

fn data(body: Wire) -> Result<Vec<Wire>, StorageError> {
    match body {
        Wire::Map(entries) => {
            for (k, v) in entries {
                if k.as_u64() == Some(keys::DATA) {
                    return match v {
                        Wire::Array(rows) => Ok(rows),
                        _ => Err(StorageError::Protocol(
                            "response data is not an array".to_string(),
                        )),
                    };
                }
            }
            Ok(Vec::new())
        }
        _ => Err(StorageError::Protocol("response body is not a map".to_string())),
    }
}

fn row_u64(row: &Wire, pos: usize) -> Result<u64, StorageError> {
    row.as_array()
        .and_then(|fields| fields.get(pos))
        .and_then(Wire::as_u64)
        .ok_or_else(|| StorageError::Protocol(format!("system view row has no id at {pos}")))
}

fn to_wire(value: &Value) -> Result<Wire, StorageError> {
    Ok(match value {
        Value::Nil => Wire::Nil,
        Value::Unsigned(v) => Wire::from(*v),
        Value::Integer(v) => Wire::from(*v),
        Value::Bool(v) => Wire::Boolean(*v),
        Value::Str(v) => Wire::from(v.as_str()),
        Value::Unsupported(name) => {
            return Err(StorageError::Protocol(format!("cannot send a {name} value")))
        }
    })
}

fn to_wire_tuple(tuple: &[Value]) -> Result<Wire, StorageError> {
    Ok(Wire::Array(tuple.iter().map(to_wire).collect::<Result<_, _>>()?))
}

fn from_wire(value: &Wire) -> Value {
    match value {
        Wire::Nil => Value::Nil,
        Wire::Boolean(v) => Value::Bool(*v),
        Wire::Integer(v) => match (v.as_u64(), v.as_i64()) {
            (Some(u), _) => Value::Unsigned(u),
            (None, Some(i)) => Value::Integer(i),
            (None, None) => Value::Unsupported("integer"),
        },
        Wire::String(s) => match s.as_str() {
            Some(s) => Value::Str(s.to_string()),
            None => Value::Unsupported("binary string"),
        },
        Wire::F32(_) | Wire::F64(_) => Value::Unsupported("double"),
        Wire::Binary(_) => Value::Unsupported("varbinary"),
        Wire::Array(_) => Value::Unsupported("array"),
        Wire::Map(_) => Value::Unsupported("map"),
        Wire::Ext(..) => Value::Unsupported("extension"),
    }
}

fn from_wire_tuple(row: &Wire) -> Result<Tuple, StorageError> {
    match row {
        Wire::Array(fields) => Ok(fields.iter().map(from_wire).collect()),
        _ => Err(StorageError::Protocol("tuple is not an array".to_string())),
    }
}

fn encode_frame(header: &Wire, body: &Wire) -> Result<Vec<u8>, StorageError> {
    let mut payload = Vec::new();
    for part in [header, body] {
        rmpv::encode::write_value(&mut payload, part)
            .map_err(|e| StorageError::Protocol(format!("encoding request: {e}")))?;
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::Protocol("request too large".to_string()))?;

    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.push(0xce);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Wire, Wire), StorageError> {
    let io_error = |e: std::io::Error| StorageError::Unavailable(format!("reading response: {e}"));

    let len = match reader.read_u8().await.map_err(io_error)? {
        small @ 0x00..=0x7f => u64::from(small),
        0xcc => u64::from(reader.read_u8().await.map_err(io_error)?),
        0xcd => u64::from(reader.read_u16().await.map_err(io_error)?),
        0xce => u64::from(reader.read_u32().await.map_err(io_error)?),
        other => return Err(StorageError::Protocol(format!("bad frame length marker {other:#x}"))),
    };
    let len =
        usize::try_from(len).map_err(|_| StorageError::Protocol("frame too large".to_string()))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(io_error)?;

    let mut cursor = payload.as_slice();
    let header = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| StorageError::Protocol(format!("decoding header: {e}")))?;
    let body = if cursor.is_empty() {
        Wire::Map(Vec::new())
    } else {
        rmpv::decode::read_value(&mut cursor)
            .map_err(|e| StorageError::Protocol(format!("decoding body: {e}")))?
    };
    Ok((header, body))
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &Wire,
    body: &Wire,
) -> Result<(), StorageError> {
    let frame = encode_frame(header, body)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| StorageError::Unavailable(format!("sending frame: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::net::TcpListener;

    use super::*;

    const TEST_SALT: [u8; 32] = [7; 32];

    /// Decides the reply to one request: `Ok(body)` or `Err((code, message))`.
    type Handler = Arc<dyn Fn(u64, &Wire) -> Result<Wire, (u32, &'static str)> + Send + Sync>;

    fn handler(
        f: impl Fn(u64, &Wire) -> Result<Wire, (u32, &'static str)> + Send + Sync + 'static,
    ) -> Handler {
        Arc::new(f)
    }

    fn greeting() -> Vec<u8> {
        let mut banner = format!("{:<63}\n", "Tarantool 2.11.0 (Binary) 00000000-0000-0000-0000-000000000000");
        let salt = format!("{:<63}\n", STANDARD.encode(TEST_SALT));
        banner.push_str(&salt);
        banner.into_bytes()
    }

    /// A scripted server: sends the greeting, then answers every frame with
    /// `handler`. Serves any number of connections.
    async fn server(handler: Handler) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    stream.write_all(&greeting()).await.unwrap();
                    while let Ok((header, body)) = read_frame(&mut stream).await {
                        let kind = field(&header, keys::REQUEST_TYPE).and_then(Wire::as_u64).unwrap();
                        let sync = field(&header, keys::SYNC).cloned().unwrap();
                        let (code, reply) = match handler(kind, &body) {
                            Ok(reply) => (0, reply),
                            Err((code, message)) => (
                                ERROR_FLAG | u64::from(code),
                                map(vec![(keys::ERROR, Wire::from(message))]),
                            ),
                        };
                        let header = map(vec![(keys::REQUEST_TYPE, Wire::from(code)), (keys::SYNC, sync)]);
                        write_frame(&mut stream, &header, &reply).await.unwrap();
                    }
                });
            }
        });
        addr
    }

    fn rows(rows: Vec<Wire>) -> Wire {
        map(vec![(keys::DATA, Wire::Array(rows))])
    }

    fn u(body: &Wire, k: u64) -> u64 {
        field(body, k).and_then(Wire::as_u64).unwrap()
    }

    /// Accepts `todo`/`test`, knows space `todo` (512) with index `created`
    /// (1) and hands every other request to `rest`.
    fn todo_server(rest: Handler) -> Handler {
        handler(move |kind, body| match kind {
            request::AUTH => {
                let tuple = field(body, keys::TUPLE).and_then(Wire::as_array).unwrap();
                let expected = scramble(&TEST_SALT, "test").to_vec();
                if field(body, keys::USER_NAME).and_then(Wire::as_str) == Some("todo")
                    && tuple[0].as_str() == Some("chap-sha1")
                    && tuple[1] == Wire::Binary(expected)
                {
                    Ok(map(vec![]))
                } else {
                    Err((47, "Incorrect password supplied for user 'todo'"))
                }
            }
            request::SELECT if u(body, keys::SPACE_ID) == VSPACE => {
                let name = field(body, keys::KEY).and_then(Wire::as_array).unwrap()[0].clone();
                if name.as_str() == Some("todo") {
                    Ok(rows(vec![Wire::Array(vec![Wire::from(512u64), Wire::from(1u64), name])]))
                } else {
                    Ok(rows(vec![]))
                }
            }
            request::SELECT if u(body, keys::SPACE_ID) == VINDEX => {
                let key = field(body, keys::KEY).and_then(Wire::as_array).unwrap();
                if key[1].as_str() == Some("created") {
                    Ok(rows(vec![Wire::Array(vec![
                        Wire::from(512u64),
                        Wire::from(1u64),
                        key[1].clone(),
                    ])]))
                } else {
                    Ok(rows(vec![]))
                }
            }
            _ => rest(kind, body),
        })
    }

    fn connector(addr: &str, password: &str) -> RemoteConnector {
        RemoteConnector::new(addr, Credentials::new("todo", password))
            .with_timeout(Duration::from_secs(2))
    }

    #[test]
    fn scramble_matches_chap_sha1() {
        assert_eq!(
            scramble(&TEST_SALT, "test"),
            [
                26, 197, 53, 148, 24, 73, 99, 85, 219, 190, 163, 183, 203, 190, 236, 235, 241, 86,
                122, 235
            ]
        );
    }

    #[test]
    fn greeting_yields_salt() {
        assert_eq!(parse_greeting(&greeting()).unwrap(), TEST_SALT.to_vec());
    }

    #[test]
    fn greeting_from_another_server_is_rejected() {
        let mut bytes = greeting();
        bytes[..9].copy_from_slice(b"HTTP/1.1 ");
        assert!(matches!(parse_greeting(&bytes), Err(StorageError::Protocol(_))));
    }

    #[test]
    fn wire_integers_keep_their_sign() {
        assert_eq!(from_wire(&Wire::from(5i64)), Value::Unsigned(5));
        assert_eq!(from_wire(&Wire::from(-5i64)), Value::Integer(-5));
        assert_eq!(from_wire(&Wire::F64(1.5)), Value::Unsupported("double"));
    }

    #[tokio::test]
    async fn connect_authenticates() {
        let addr = server(todo_server(handler(|_, _| Err((0, "unexpected"))))).await;

        assert!(connector(&addr, "test").connect().await.is_ok());
        let err = connector(&addr, "wrong").connect().await.err().unwrap();
        assert_eq!(err, StorageError::AccessDenied("todo".to_string()));
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connector(&addr, "test").connect().await.err().unwrap();
        assert!(matches!(err, StorageError::Unavailable(_)), "got {err:?}");
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn select_resolves_names_once_and_decodes_tuples() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&lookups);
        let addr = server(handler(move |kind, body| {
            if kind == request::SELECT && u(body, keys::SPACE_ID) != 512 {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            todo_server(handler(|_, body| {
                assert_eq!(u(body, keys::INDEX_ID), 1);
                assert_eq!(u(body, keys::ITERATOR), 4);
                Ok(rows(vec![Wire::Array(vec![
                    Wire::from(9u64),
                    Wire::from("write report"),
                    Wire::Boolean(false),
                    Wire::from(1_700_000_000i64),
                    Wire::Nil,
                ])]))
            }))(kind, body)
        }))
        .await;
        let connector = connector(&addr, "test");

        for _ in 0..2 {
            let mut session = connector.connect().await.unwrap();
            let tuples = session
                .select("todo", "created", Value::Unsigned(u64::MAX), IteratorType::Le)
                .await
                .unwrap();
            assert_eq!(
                tuples,
                vec![vec![
                    Value::Unsigned(9),
                    Value::Str("write report".to_string()),
                    Value::Bool(false),
                    Value::Unsigned(1_700_000_000),
                    Value::Nil,
                ]]
            );
        }
        assert_eq!(lookups.load(Ordering::SeqCst), 2, "one space and one index lookup");
    }

    #[tokio::test]
    async fn unknown_space_and_index_are_reported() {
        let addr = server(todo_server(handler(|_, _| Ok(rows(vec![]))))).await;
        let mut session = connector(&addr, "test").connect().await.unwrap();

        let err = session.insert("nope", vec![Value::Unsigned(1)]).await.unwrap_err();
        assert_eq!(err, StorageError::NoSuchSpace("nope".to_string()));

        let err = session
            .select("todo", "by_title", Value::Unsigned(0), IteratorType::Eq)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchIndex { .. }));
    }

    #[tokio::test]
    async fn duplicate_insert_maps_to_duplicate_key() {
        let addr = server(todo_server(handler(|kind, _| match kind {
            request::INSERT => Err((ER_TUPLE_FOUND, "Duplicate key exists in unique index 'primary'")),
            _ => Ok(rows(vec![])),
        })))
        .await;
        let mut session = connector(&addr, "test").connect().await.unwrap();

        let err = session
            .insert("todo", vec![Value::Unsigned(1), Value::Str("a".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn update_sends_assignments_by_primary_key() {
        let addr = server(todo_server(handler(|kind, body| {
            assert_eq!(kind, request::UPDATE);
            assert_eq!(u(body, keys::INDEX_ID), PRIMARY);
            let key = field(body, keys::KEY).and_then(Wire::as_array).unwrap();
            if key[0].as_u64() != Some(9) {
                return Ok(rows(vec![]));
            }
            let ops = field(body, keys::TUPLE).and_then(Wire::as_array).unwrap();
            assert_eq!(
                ops[0],
                Wire::Array(vec![Wire::from("="), Wire::from(1u64), Wire::from("renamed")])
            );
            Ok(rows(vec![Wire::Array(vec![Wire::from(9u64), Wire::from("renamed")])]))
        })))
        .await;
        let mut session = connector(&addr, "test").connect().await.unwrap();
        let ops = vec![UpdateOp::Assign {
            field: 1,
            value: Value::Str("renamed".to_string()),
        }];

        let updated = session.update("todo", Value::Unsigned(9), ops.clone()).await.unwrap();
        assert_eq!(
            updated,
            Some(vec![Value::Unsigned(9), Value::Str("renamed".to_string())])
        );
        let missing = session.update("todo", Value::Unsigned(10), ops).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn other_server_errors_pass_through() {
        let addr = server(todo_server(handler(|_, _| {
            Err((94, "Attempt to modify a tuple field which is part of primary index"))
        })))
        .await;
        let mut session = connector(&addr, "test").connect().await.unwrap();

        let err = session.delete("todo", Value::Unsigned(1)).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::Server {
                code: 94,
                message: "Attempt to modify a tuple field which is part of primary index".to_string(),
            }
        );
        assert!(!err.is_connection());
    }
}
