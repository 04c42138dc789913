//! In-process storage engine.
//!
//! It follows the same contract as `RemoteConnector` without a server, which
//! makes it the storage double for service and HTTP tests.
//!
//! # Design
//! A `MemoryEngine` holds named spaces behind one `tokio::sync::RwLock`, so
//! every insert, update and delete is applied atomically with respect to the
//! others. Each space has a unique primary index and any number of
//! non-unique secondary indexes, every index covering a single tuple field.
//!
//! Index keys compare numerically across unsigned and signed integers, so a
//! search key of `Unsigned(u64::MAX)` bounds an index over `Integer` fields.
//! Secondary indexes map a key to the set of primary keys holding it;
//! descending iterators reverse the whole order, ties included.
//!
//! `MemoryConnector` is the `Connector` for this engine. It authenticates
//! every connect against the engine's users and refuses to connect once the
//! engine has been shut down.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Connector, Credentials, IteratorType, Session};
use crate::codec::{Tuple, UpdateOp, Value};
use crate::error::StorageError;

/// Type of the values an index accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Unsigned,
    Integer,
}

impl KeyKind {
    fn name(self) -> &'static str {
        match self {
            KeyKind::Unsigned => "unsigned",
            KeyKind::Integer => "integer",
        }
    }
}

/// A single-field index.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub field: usize,
    pub kind: KeyKind,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, field: usize, kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            field,
            kind,
        }
    }
}

/// Layout of a space: one unique primary index plus non-unique secondaries.
#[derive(Debug, Clone)]
pub struct SpaceDef {
    pub name: String,
    pub primary: IndexDef,
    pub secondary: Vec<IndexDef>,
}

impl SpaceDef {
    /// The todo space: unsigned primary key on field 0 and a `created` index
    /// over the epoch seconds in field 3.
    pub fn todo(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: IndexDef::new("primary", 0, KeyKind::Unsigned),
            secondary: vec![IndexDef::new("created", 3, KeyKind::Integer)],
        }
    }
}

/// Index keys are numbers compared across signed and unsigned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey(i128);

impl IndexKey {
    /// Key for a stored field. Unsigned indexes only take unsigned values.
    fn from_field(value: &Value, kind: KeyKind, field: usize) -> Result<Self, StorageError> {
        match (kind, value) {
            (KeyKind::Unsigned | KeyKind::Integer, Value::Unsigned(v)) => {
                Ok(IndexKey(i128::from(*v)))
            }
            (KeyKind::Integer, Value::Integer(v)) => Ok(IndexKey(i128::from(*v))),
            (kind, other) => Err(StorageError::KeyType {
                field,
                expected: kind.name(),
                found: other.type_name(),
            }),
        }
    }

    /// Key for a search. Any integer may bound a numeric index.
    fn from_search(value: &Value, kind: KeyKind, field: usize) -> Result<Self, StorageError> {
        match (kind, value) {
            (_, Value::Integer(v)) => Ok(IndexKey(i128::from(*v))),
            _ => Self::from_field(value, kind, field),
        }
    }
}

struct Space {
    def: SpaceDef,
    primary: BTreeMap<IndexKey, Tuple>,
    secondary: Vec<BTreeMap<IndexKey, BTreeSet<IndexKey>>>,
}

enum IndexRef<'a> {
    Primary(&'a IndexDef),
    Secondary(usize, &'a IndexDef),
}

impl Space {
    fn new(def: SpaceDef) -> Self {
        let secondary = def.secondary.iter().map(|_| BTreeMap::new()).collect();
        Self {
            def,
            primary: BTreeMap::new(),
            secondary,
        }
    }

    fn index(&self, name: &str) -> Result<IndexRef<'_>, StorageError> {
        if self.def.primary.name == name {
            return Ok(IndexRef::Primary(&self.def.primary));
        }
        self.def
            .secondary
            .iter()
            .enumerate()
            .find(|(_, def)| def.name == name)
            .map(|(pos, def)| IndexRef::Secondary(pos, def))
            .ok_or_else(|| StorageError::NoSuchIndex {
                space: self.def.name.clone(),
                index: name.to_string(),
            })
    }

    fn key_of(tuple: &[Value], def: &IndexDef) -> Result<IndexKey, StorageError> {
        let value = tuple.get(def.field).ok_or(StorageError::FieldOutOfRange {
            field: def.field,
            len: tuple.len(),
        })?;
        IndexKey::from_field(value, def.kind, def.field)
    }

    fn secondary_keys(&self, tuple: &[Value]) -> Result<Vec<IndexKey>, StorageError> {
        self.def
            .secondary
            .iter()
            .map(|def| Self::key_of(tuple, def))
            .collect()
    }

    fn insert(&mut self, tuple: Tuple) -> Result<Tuple, StorageError> {
        let pk = Self::key_of(&tuple, &self.def.primary)?;
        let keys = self.secondary_keys(&tuple)?;
        if self.primary.contains_key(&pk) {
            return Err(StorageError::DuplicateKey {
                space: self.def.name.clone(),
                index: self.def.primary.name.clone(),
            });
        }
        for (index, key) in self.secondary.iter_mut().zip(keys) {
            index.entry(key).or_default().insert(pk);
        }
        self.primary.insert(pk, tuple.clone());
        Ok(tuple)
    }

    fn update(&mut self, key: &Value, ops: &[UpdateOp]) -> Result<Option<Tuple>, StorageError> {
        let primary = &self.def.primary;
        let pk = IndexKey::from_search(key, primary.kind, primary.field)?;
        let Some(current) = self.primary.get(&pk) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        for op in ops {
            match op {
                UpdateOp::Assign { field, value } => {
                    if *field == primary.field {
                        return Err(StorageError::IndexedFieldUpdate { field: *field });
                    }
                    let len = updated.len();
                    let slot = updated
                        .get_mut(*field)
                        .ok_or(StorageError::FieldOutOfRange { field: *field, len })?;
                    *slot = value.clone();
                }
            }
        }

        let old_keys = self.secondary_keys(current)?;
        let new_keys = self.secondary_keys(&updated)?;
        for ((index, old), new) in self.secondary.iter_mut().zip(old_keys).zip(new_keys) {
            if old == new {
                continue;
            }
            remove_entry(index, &old, &pk);
            index.entry(new).or_default().insert(pk);
        }
        self.primary.insert(pk, updated.clone());
        Ok(Some(updated))
    }

    fn select(
        &self,
        index: &str,
        key: &Value,
        iterator: IteratorType,
    ) -> Result<Vec<Tuple>, StorageError> {
        let index = self.index(index)?;
        let def = match &index {
            IndexRef::Primary(def) | IndexRef::Secondary(_, def) => *def,
        };
        let search = IndexKey::from_search(key, def.kind, def.field)?;
        let (range, descending) = bounds(search, iterator);

        let tuples: Vec<Tuple> = match index {
            IndexRef::Primary(_) => {
                let entries = self.primary.range(range).map(|(_, tuple)| tuple.clone());
                if descending {
                    entries.rev().collect()
                } else {
                    entries.collect()
                }
            }
            IndexRef::Secondary(pos, _) => {
                let entries = self.secondary[pos].range(range);
                let pks: Vec<IndexKey> = if descending {
                    entries.rev().flat_map(|(_, pks)| pks.iter().rev().copied()).collect()
                } else {
                    entries.flat_map(|(_, pks)| pks.iter().copied()).collect()
                };
                pks.into_iter()
                    .filter_map(|pk| self.primary.get(&pk).cloned())
                    .collect()
            }
        };
        Ok(tuples)
    }

    fn delete(&mut self, key: &Value) -> Result<Option<Tuple>, StorageError> {
        let primary = &self.def.primary;
        let pk = IndexKey::from_search(key, primary.kind, primary.field)?;
        let Some(tuple) = self.primary.remove(&pk) else {
            return Ok(None);
        };
        let keys = self.secondary_keys(&tuple)?;
        for (index, key) in self.secondary.iter_mut().zip(keys) {
            remove_entry(index, &key, &pk);
        }
        Ok(Some(tuple))
    }
}

fn remove_entry(index: &mut BTreeMap<IndexKey, BTreeSet<IndexKey>>, key: &IndexKey, pk: &IndexKey) {
    if let Some(pks) = index.get_mut(key) {
        pks.remove(pk);
        if pks.is_empty() {
            index.remove(key);
        }
    }
}

fn bounds(key: IndexKey, iterator: IteratorType) -> ((Bound<IndexKey>, Bound<IndexKey>), bool) {
    match iterator {
        IteratorType::Eq => ((Bound::Included(key), Bound::Included(key)), false),
        IteratorType::Le => ((Bound::Unbounded, Bound::Included(key)), true),
    }
}

struct EngineState {
    running: bool,
    users: HashMap<String, String>,
    spaces: HashMap<String, Space>,
}

impl EngineState {
    fn space(&self, name: &str) -> Result<&Space, StorageError> {
        self.spaces
            .get(name)
            .ok_or_else(|| StorageError::NoSuchSpace(name.to_string()))
    }

    fn space_mut(&mut self, name: &str) -> Result<&mut Space, StorageError> {
        self.spaces
            .get_mut(name)
            .ok_or_else(|| StorageError::NoSuchSpace(name.to_string()))
    }

    fn ensure_running(&self) -> Result<(), StorageError> {
        if self.running {
            Ok(())
        } else {
            Err(StorageError::Unavailable("engine is shut down".to_string()))
        }
    }
}

/// Shared handle to an in-process engine. Clones refer to the same data.
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<RwLock<EngineState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(EngineState {
                running: true,
                users: HashMap::new(),
                spaces: HashMap::new(),
            })),
        }
    }

    /// Add a user, replacing the password if the user exists.
    pub async fn create_user(&self, user: &str, password: &str) {
        let mut state = self.state.write().await;
        state.users.insert(user.to_string(), password.to_string());
        tracing::debug!(user, "storage user created");
    }

    /// Create a space. Creating a space that already exists is a no-op.
    pub async fn create_space(&self, def: SpaceDef) {
        let mut state = self.state.write().await;
        if state.spaces.contains_key(&def.name) {
            return;
        }
        tracing::debug!(space = %def.name, "storage space created");
        state.spaces.insert(def.name.clone(), Space::new(def));
    }

    /// Make the engine unreachable. New connects and operations on open
    /// sessions fail with `StorageError::Unavailable`.
    pub async fn shutdown(&self) {
        self.state.write().await.running = false;
        tracing::info!("storage engine shut down");
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `Connector` over a `MemoryEngine`.
#[derive(Clone)]
pub struct MemoryConnector {
    engine: MemoryEngine,
    credentials: Credentials,
}

impl MemoryConnector {
    pub fn new(engine: MemoryEngine, credentials: Credentials) -> Self {
        Self {
            engine,
            credentials,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, StorageError> {
        let state = self.engine.state.read().await;
        state.ensure_running()?;
        match state.users.get(&self.credentials.user) {
            Some(password) if *password == self.credentials.password => {}
            _ => return Err(StorageError::AccessDenied(self.credentials.user.clone())),
        }
        Ok(Box::new(MemorySession {
            engine: self.engine.clone(),
        }))
    }
}

struct MemorySession {
    engine: MemoryEngine,
}

#[async_trait]
impl Session for MemorySession {
    async fn insert(&mut self, space: &str, tuple: Tuple) -> Result<Tuple, StorageError> {
        let mut state = self.engine.state.write().await;
        state.ensure_running()?;
        state.space_mut(space)?.insert(tuple)
    }

    async fn update(
        &mut self,
        space: &str,
        key: Value,
        ops: Vec<UpdateOp>,
    ) -> Result<Option<Tuple>, StorageError> {
        let mut state = self.engine.state.write().await;
        state.ensure_running()?;
        state.space_mut(space)?.update(&key, &ops)
    }

    async fn select(
        &mut self,
        space: &str,
        index: &str,
        key: Value,
        iterator: IteratorType,
    ) -> Result<Vec<Tuple>, StorageError> {
        let state = self.engine.state.read().await;
        state.ensure_running()?;
        state.space(space)?.select(index, &key, iterator)
    }

    async fn delete(&mut self, space: &str, key: Value) -> Result<Option<Tuple>, StorageError> {
        let mut state = self.engine.state.write().await;
        state.ensure_running()?;
        state.space_mut(space)?.delete(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u64, title: &str, created: i64) -> Tuple {
        vec![
            Value::Unsigned(id),
            Value::Str(title.to_string()),
            Value::Bool(false),
            Value::Integer(created),
            Value::Nil,
        ]
    }

    fn ids(tuples: &[Tuple]) -> Vec<u64> {
        tuples
            .iter()
            .map(|t| match t[0] {
                Value::Unsigned(id) => id,
                ref other => panic!("unexpected id {other:?}"),
            })
            .collect()
    }

    async fn session() -> (MemoryEngine, Box<dyn Session>) {
        let engine = MemoryEngine::new();
        engine.create_user("todo", "test").await;
        engine.create_space(SpaceDef::todo("todo")).await;
        let connector = MemoryConnector::new(engine.clone(), Credentials::new("todo", "test"));
        let session = connector.connect().await.unwrap();
        (engine, session)
    }

    // --- connect ---

    #[tokio::test]
    async fn connect_rejects_wrong_password() {
        let engine = MemoryEngine::new();
        engine.create_user("todo", "test").await;
        let connector = MemoryConnector::new(engine, Credentials::new("todo", "nope"));
        let err = connector.connect().await.err().unwrap();
        assert_eq!(err, StorageError::AccessDenied("todo".to_string()));
    }

    #[tokio::test]
    async fn connect_fails_after_shutdown() {
        let (engine, mut session) = session().await;
        engine.shutdown().await;
        let connector = MemoryConnector::new(engine, Credentials::new("todo", "test"));
        let err = connector.connect().await.err().unwrap();
        assert!(err.is_connection());

        let err = session.insert("todo", row(1, "a", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    // --- insert ---

    #[tokio::test]
    async fn insert_rejects_duplicate_primary_key() {
        let (_engine, mut session) = session().await;
        session.insert("todo", row(1, "a", 10)).await.unwrap();
        let err = session.insert("todo", row(1, "b", 20)).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn insert_rejects_wrong_key_type() {
        let (_engine, mut session) = session().await;
        let mut tuple = row(1, "a", 10);
        tuple[3] = Value::Str("yesterday".to_string());
        let err = session.insert("todo", tuple).await.unwrap_err();
        assert!(matches!(err, StorageError::KeyType { field: 3, .. }));
    }

    #[tokio::test]
    async fn insert_into_missing_space_fails() {
        let (_engine, mut session) = session().await;
        let err = session.insert("nope", row(1, "a", 10)).await.unwrap_err();
        assert_eq!(err, StorageError::NoSuchSpace("nope".to_string()));
    }

    // --- select ---

    #[tokio::test]
    async fn select_le_on_secondary_is_newest_first() {
        let (_engine, mut session) = session().await;
        session.insert("todo", row(1, "old", 100)).await.unwrap();
        session.insert("todo", row(2, "new", 300)).await.unwrap();
        session.insert("todo", row(3, "mid", 200)).await.unwrap();

        let tuples = session
            .select("todo", "created", Value::Unsigned(u64::MAX), IteratorType::Le)
            .await
            .unwrap();
        assert_eq!(ids(&tuples), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn select_orders_ties_by_primary_key() {
        let (_engine, mut session) = session().await;
        for id in [5, 2, 9] {
            session.insert("todo", row(id, "same", 100)).await.unwrap();
        }

        let asc = session
            .select("todo", "created", Value::Integer(100), IteratorType::Eq)
            .await
            .unwrap();
        assert_eq!(ids(&asc), vec![2, 5, 9]);

        let desc = session
            .select("todo", "created", Value::Integer(100), IteratorType::Le)
            .await
            .unwrap();
        assert_eq!(ids(&desc), vec![9, 5, 2]);
    }

    #[tokio::test]
    async fn select_on_primary() {
        let (_engine, mut session) = session().await;
        for id in 1..=5 {
            session.insert("todo", row(id, "x", id as i64)).await.unwrap();
        }

        let eq = session
            .select("todo", "primary", Value::Unsigned(3), IteratorType::Eq)
            .await
            .unwrap();
        assert_eq!(ids(&eq), vec![3]);

        let le = session
            .select("todo", "primary", Value::Unsigned(3), IteratorType::Le)
            .await
            .unwrap();
        assert_eq!(ids(&le), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn select_rejects_non_numeric_search_key() {
        let (_engine, mut session) = session().await;
        let err = session
            .select("todo", "primary", Value::Str("3".to_string()), IteratorType::Eq)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::KeyType { field: 0, .. }));
    }

    #[tokio::test]
    async fn select_unknown_index_fails() {
        let (_engine, mut session) = session().await;
        let err = session
            .select("todo", "by_title", Value::Unsigned(0), IteratorType::Eq)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoSuchIndex { .. }));
    }

    // --- update ---

    #[tokio::test]
    async fn update_assigns_fields_and_reindexes() {
        let (_engine, mut session) = session().await;
        session.insert("todo", row(1, "a", 100)).await.unwrap();
        session.insert("todo", row(2, "b", 200)).await.unwrap();

        let updated = session
            .update(
                "todo",
                Value::Unsigned(1),
                vec![UpdateOp::Assign {
                    field: 3,
                    value: Value::Integer(300),
                }],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated[3], Value::Integer(300));

        let tuples = session
            .select("todo", "created", Value::Unsigned(u64::MAX), IteratorType::Le)
            .await
            .unwrap();
        assert_eq!(ids(&tuples), vec![1, 2]);
    }

    #[tokio::test]
    async fn update_missing_key_returns_none() {
        let (_engine, mut session) = session().await;
        let result = session
            .update(
                "todo",
                Value::Unsigned(7),
                vec![UpdateOp::Assign {
                    field: 1,
                    value: Value::Str("x".to_string()),
                }],
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_rejects_primary_key_and_out_of_range_fields() {
        let (_engine, mut session) = session().await;
        session.insert("todo", row(1, "a", 100)).await.unwrap();

        let err = session
            .update(
                "todo",
                Value::Unsigned(1),
                vec![UpdateOp::Assign {
                    field: 0,
                    value: Value::Unsigned(2),
                }],
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::IndexedFieldUpdate { field: 0 });

        let err = session
            .update(
                "todo",
                Value::Unsigned(1),
                vec![UpdateOp::Assign {
                    field: 9,
                    value: Value::Nil,
                }],
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::FieldOutOfRange { field: 9, len: 5 });
    }

    #[tokio::test]
    async fn failed_update_leaves_tuple_untouched() {
        let (_engine, mut session) = session().await;
        session.insert("todo", row(1, "a", 100)).await.unwrap();

        let err = session
            .update(
                "todo",
                Value::Unsigned(1),
                vec![
                    UpdateOp::Assign {
                        field: 1,
                        value: Value::Str("changed".to_string()),
                    },
                    UpdateOp::Assign {
                        field: 3,
                        value: Value::Bool(true),
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::KeyType { field: 3, .. }));

        let tuples = session
            .select("todo", "primary", Value::Unsigned(1), IteratorType::Eq)
            .await
            .unwrap();
        assert_eq!(tuples, vec![row(1, "a", 100)]);
    }

    // --- delete ---

    #[tokio::test]
    async fn delete_removes_from_every_index() {
        let (_engine, mut session) = session().await;
        session.insert("todo", row(1, "a", 100)).await.unwrap();

        let deleted = session.delete("todo", Value::Unsigned(1)).await.unwrap();
        assert_eq!(deleted, Some(row(1, "a", 100)));

        let tuples = session
            .select("todo", "created", Value::Unsigned(u64::MAX), IteratorType::Le)
            .await
            .unwrap();
        assert!(tuples.is_empty());

        let again = session.delete("todo", Value::Unsigned(1)).await.unwrap();
        assert!(again.is_none());
    }
}
