use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_lock::Mutex as AsyncMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::database::backend::{path_starts_with, select_backend, DatabaseBackend, InMemoryBackend};
use crate::database::error::{internal_error, invalid_argument, DatabaseError, DatabaseResult};
use crate::database::listener::{ChildAddedFn, ChildEventListener, ValueEventListener, ValueFn};
use crate::database::options::DatabaseOptions;
use crate::database::push_id::generate_push_id;
use crate::database::query::{compare_keys, QueryIndex, QueryLimit, QueryParams};

/// Handle to a Realtime Database tree. Cloning is cheap and clones share the
/// backend and the listener table.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    backend: Arc<dyn DatabaseBackend>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    /// Held across a write and the listener reads that diff it.
    dispatch: AsyncMutex<()>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &"dynamic")
            .field("listeners", &self.active_listeners())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseReference {
    database: Database,
    path: Vec<String>,
}

/// A reference plus ordering and window constraints.
#[derive(Clone, Debug)]
pub struct DatabaseQuery {
    reference: DatabaseReference,
    params: QueryParams,
}

#[derive(Clone)]
enum ListenerKind {
    Value(Arc<dyn ValueEventListener>),
    Child(Arc<dyn ChildEventListener>),
}

#[derive(Clone)]
struct Listener {
    target: ListenerTarget,
    kind: ListenerKind,
}

#[derive(Clone, Debug)]
struct ListenerTarget {
    path: Vec<String>,
    params: QueryParams,
}

impl ListenerTarget {
    fn matches(&self, changed_path: &[String]) -> bool {
        path_starts_with(&self.path, changed_path) || path_starts_with(changed_path, &self.path)
    }
}

/// Immutable copy of the data at a location, handed to listeners and returned
/// by reads.
#[derive(Clone, Debug)]
pub struct DataSnapshot {
    reference: DatabaseReference,
    value: Value,
}

impl DataSnapshot {
    pub fn reference(&self) -> &DatabaseReference {
        &self.reference
    }

    pub fn key(&self) -> Option<&str> {
        self.reference.key()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Returns a snapshot for the provided relative path. Missing data yields
    /// a snapshot holding null.
    pub fn child(&self, relative_path: &str) -> DatabaseResult<DataSnapshot> {
        let segments = normalize_path(relative_path)?;
        let value = get_value_at_path(&self.value, &segments).unwrap_or(Value::Null);
        let mut path = self.reference.path.clone();
        path.extend(segments);
        Ok(DataSnapshot {
            reference: self.reference.database.reference_from_segments(path),
            value,
        })
    }

    pub fn has_child(&self, relative_path: &str) -> DatabaseResult<bool> {
        let segments = normalize_path(relative_path)?;
        Ok(get_value_at_path(&self.value, &segments).is_some_and(|value| !value.is_null()))
    }

    pub fn has_children(&self) -> bool {
        self.size() > 0
    }

    pub fn size(&self) -> usize {
        match &self.value {
            Value::Object(map) => map.len(),
            Value::Array(array) => array.iter().filter(|item| !item.is_null()).count(),
            _ => 0,
        }
    }

    /// Direct children in key order.
    pub fn children(&self) -> Vec<DataSnapshot> {
        children_of(&self.value)
            .into_iter()
            .map(|(key, value)| {
                let mut path = self.reference.path.clone();
                path.push(key);
                DataSnapshot {
                    reference: self.reference.database.reference_from_segments(path),
                    value,
                }
            })
            .collect()
    }

    /// Decodes the snapshot into `T`. Returns `None` when the location is empty
    /// or its shape does not match.
    pub fn deserialize<T>(&self) -> Option<T>
    where
        T: DeserializeOwned,
    {
        if self.value.is_null() {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// Keeps a listener attached. Dropping the handle detaches it.
#[must_use = "dropping a ListenerRegistration detaches the listener"]
pub struct ListenerRegistration {
    database: Database,
    id: Option<u64>,
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .finish()
    }
}

impl ListenerRegistration {
    fn new(database: Database, id: u64) -> Self {
        Self {
            database,
            id: Some(id),
        }
    }

    /// `false` once the listener was detached or cancelled by the database.
    pub fn is_active(&self) -> bool {
        self.id
            .is_some_and(|id| self.database.lock_listeners().contains_key(&id))
    }

    pub fn detach(mut self) {
        if let Some(id) = self.id.take() {
            self.database.remove_listener(id);
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.database.remove_listener(id);
        }
    }
}

impl Database {
    /// Opens a database using the backend selected by `options`.
    pub fn new(options: DatabaseOptions) -> Self {
        Self::with_backend(select_backend(&options))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::default()))
    }

    pub fn with_backend(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                backend,
                listeners: Mutex::new(BTreeMap::new()),
                next_listener_id: AtomicU64::new(1),
                dispatch: AsyncMutex::new(()),
            }),
        }
    }

    pub fn reference(&self, path: &str) -> DatabaseResult<DatabaseReference> {
        let segments = normalize_path(path)?;
        Ok(self.reference_from_segments(segments))
    }

    pub fn root(&self) -> DatabaseReference {
        self.reference_from_segments(Vec::new())
    }

    pub fn active_listeners(&self) -> usize {
        self.lock_listeners().len()
    }

    fn reference_from_segments(&self, segments: Vec<String>) -> DatabaseReference {
        DatabaseReference {
            database: self.clone(),
            path: segments,
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn register_listener(
        &self,
        target: ListenerTarget,
        kind: ListenerKind,
    ) -> ListenerRegistration {
        let _dispatch = self.inner.dispatch.lock().await;
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.lock_listeners().insert(
            id,
            Listener {
                target: target.clone(),
                kind: kind.clone(),
            },
        );

        match self.read_target(&target).await {
            Ok(value) => match &kind {
                ListenerKind::Value(listener) => {
                    listener.on_data_change(self.snapshot_at(&target.path, value));
                }
                ListenerKind::Child(listener) => {
                    self.emit_child_events(&target.path, listener.as_ref(), &Value::Null, &value);
                }
            },
            Err(err) => self.cancel_listener(id, err),
        }

        ListenerRegistration::new(self.clone(), id)
    }

    fn remove_listener(&self, id: u64) -> Option<Listener> {
        self.lock_listeners().remove(&id)
    }

    /// Removes the listener and reports `error` to it. A listener that was
    /// already removed is not notified again.
    fn cancel_listener(&self, id: u64, error: DatabaseError) {
        let Some(listener) = self.remove_listener(id) else {
            return;
        };
        log::debug!("cancelling listener {id}: {error}");
        match listener.kind {
            ListenerKind::Value(listener) => listener.on_cancelled(error),
            ListenerKind::Child(listener) => listener.on_cancelled(error),
        }
    }

    fn listeners_for(&self, changed_path: &[String]) -> Vec<(u64, Listener)> {
        self.lock_listeners()
            .iter()
            .filter(|(_, listener)| listener.target.matches(changed_path))
            .map(|(id, listener)| (*id, listener.clone()))
            .collect()
    }

    async fn read_target(&self, target: &ListenerTarget) -> DatabaseResult<Value> {
        let rest_params = target.params.to_rest_params()?;
        let value = self
            .inner
            .backend
            .get(&target.path, rest_params.as_slice())
            .await?;
        Ok(target.params.apply(value))
    }

    /// Runs `write` and notifies every listener whose target overlaps
    /// `changed_path`. Child listeners are diffed against the value read
    /// before the write.
    async fn commit<W>(&self, changed_path: &[String], write: W) -> DatabaseResult<()>
    where
        W: Future<Output = DatabaseResult<()>>,
    {
        let _dispatch = self.inner.dispatch.lock().await;
        let affected = self.listeners_for(changed_path);
        let mut before = Vec::with_capacity(affected.len());
        for (_, listener) in &affected {
            let value = match listener.kind {
                ListenerKind::Child(_) => self
                    .read_target(&listener.target)
                    .await
                    .unwrap_or(Value::Null),
                ListenerKind::Value(_) => Value::Null,
            };
            before.push(value);
        }

        write.await?;

        log::debug!(
            "write at /{} notifies {} listener(s)",
            changed_path.join("/"),
            affected.len()
        );
        for ((id, listener), old_value) in affected.into_iter().zip(before) {
            if !self.lock_listeners().contains_key(&id) {
                continue;
            }
            match self.read_target(&listener.target).await {
                Ok(new_value) => match &listener.kind {
                    ListenerKind::Value(callback) => {
                        callback.on_data_change(self.snapshot_at(&listener.target.path, new_value));
                    }
                    ListenerKind::Child(callback) => {
                        self.emit_child_events(
                            &listener.target.path,
                            callback.as_ref(),
                            &old_value,
                            &new_value,
                        );
                    }
                },
                Err(err) => self.cancel_listener(id, err),
            }
        }
        Ok(())
    }

    fn emit_child_events(
        &self,
        parent_path: &[String],
        listener: &dyn ChildEventListener,
        old_value: &Value,
        new_value: &Value,
    ) {
        let old_children = children_of(old_value);
        let new_children = children_of(new_value);
        let old_lookup: BTreeMap<&str, &Value> = old_children
            .iter()
            .map(|(key, value)| (key.as_str(), value))
            .collect();
        let new_lookup: BTreeMap<&str, &Value> = new_children
            .iter()
            .map(|(key, value)| (key.as_str(), value))
            .collect();

        for (key, value) in &old_children {
            if !new_lookup.contains_key(key.as_str()) {
                listener.on_child_removed(self.child_snapshot(parent_path, key, value.clone()));
            }
        }

        let mut previous: Option<&str> = None;
        for (key, value) in &new_children {
            let previous_key = previous.map(str::to_string);
            match old_lookup.get(key.as_str()) {
                None => listener.on_child_added(
                    self.child_snapshot(parent_path, key, value.clone()),
                    previous_key,
                ),
                Some(old) if *old != value => listener.on_child_changed(
                    self.child_snapshot(parent_path, key, value.clone()),
                    previous_key,
                ),
                Some(_) => {}
            }
            previous = Some(key.as_str());
        }
    }

    fn snapshot_at(&self, path: &[String], value: Value) -> DataSnapshot {
        DataSnapshot {
            reference: self.reference_from_segments(path.to_vec()),
            value,
        }
    }

    fn child_snapshot(&self, parent_path: &[String], key: &str, value: Value) -> DataSnapshot {
        let mut segments = parent_path.to_vec();
        segments.push(key.to_string());
        self.snapshot_at(&segments, value)
    }
}

impl DatabaseReference {
    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn child(&self, relative: &str) -> DatabaseResult<DatabaseReference> {
        let mut segments = self.path.clone();
        segments.extend(normalize_path(relative)?);
        Ok(self.database.reference_from_segments(segments))
    }

    pub fn parent(&self) -> Option<DatabaseReference> {
        let (_, parent) = self.path.split_last()?;
        Some(self.database.reference_from_segments(parent.to_vec()))
    }

    pub fn root(&self) -> DatabaseReference {
        self.database.root()
    }

    /// Last path segment; `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    pub fn path(&self) -> String {
        format!("/{}", self.path.join("/"))
    }

    /// Replaces the value at this location. Writing null removes it.
    pub async fn set(&self, value: Value) -> DatabaseResult<()> {
        let write = self.database.inner.backend.set(&self.path, value);
        self.database.commit(&self.path, write).await
    }

    /// Serializes `value` and writes it. `None` serializes to null and
    /// therefore removes the location.
    pub async fn set_value<T>(&self, value: &T) -> DatabaseResult<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_value(value)
            .map_err(|err| internal_error(format!("Failed to encode value: {err}")))?;
        self.set(encoded).await
    }

    /// Writes several relative child paths at once (`"favorite/j1"` style keys).
    pub async fn update(&self, updates: Map<String, Value>) -> DatabaseResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut operations = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            let relative = normalize_path(&key)?;
            if relative.is_empty() {
                return Err(invalid_argument("Database update path cannot be empty"));
            }
            let mut segments = self.path.clone();
            segments.extend(relative);
            operations.push((segments, value));
        }

        let write = self.database.inner.backend.update(&self.path, operations);
        self.database.commit(&self.path, write).await
    }

    pub async fn remove(&self) -> DatabaseResult<()> {
        let write = self.database.inner.backend.delete(&self.path);
        self.database.commit(&self.path, write).await
    }

    /// Reads the current value once.
    pub async fn get(&self) -> DatabaseResult<DataSnapshot> {
        let value = self.database.inner.backend.get(&self.path, &[]).await?;
        Ok(self.database.snapshot_at(&self.path, value))
    }

    /// Returns a child location named by a freshly generated push id. Nothing
    /// is written.
    pub fn push(&self) -> DatabaseResult<DatabaseReference> {
        let key = generate_push_id()?;
        self.child(&key)
    }

    pub async fn push_with_value(&self, value: Value) -> DatabaseResult<DatabaseReference> {
        let child = self.push()?;
        child.set(value).await?;
        Ok(child)
    }

    pub fn query(&self) -> DatabaseQuery {
        DatabaseQuery {
            reference: self.clone(),
            params: QueryParams::default(),
        }
    }

    pub fn order_by_key(&self) -> DatabaseResult<DatabaseQuery> {
        self.query().order_by_key()
    }

    pub async fn add_value_event_listener<L>(&self, listener: L) -> ListenerRegistration
    where
        L: ValueEventListener,
    {
        self.query().add_value_event_listener(listener).await
    }

    pub async fn add_child_event_listener<L>(&self, listener: L) -> ListenerRegistration
    where
        L: ChildEventListener,
    {
        self.query().add_child_event_listener(listener).await
    }

    pub async fn on_value<F>(&self, callback: F) -> ListenerRegistration
    where
        F: Fn(DataSnapshot) + Send + Sync + 'static,
    {
        self.add_value_event_listener(ValueFn(callback)).await
    }

    pub async fn on_child_added<F>(&self, callback: F) -> ListenerRegistration
    where
        F: Fn(DataSnapshot, Option<String>) + Send + Sync + 'static,
    {
        self.add_child_event_listener(ChildAddedFn(callback)).await
    }
}

impl DatabaseQuery {
    pub fn reference(&self) -> &DatabaseReference {
        &self.reference
    }

    pub fn order_by_key(mut self) -> DatabaseResult<Self> {
        self.params.set_index(QueryIndex::Key)?;
        Ok(self)
    }

    /// Keeps children whose key sorts at or after `key`.
    pub fn start_at(mut self, key: impl Into<String>) -> DatabaseResult<Self> {
        self.params.set_start(key.into())?;
        Ok(self)
    }

    /// Keeps children whose key sorts at or before `key`.
    pub fn end_at(mut self, key: impl Into<String>) -> DatabaseResult<Self> {
        self.params.set_end(key.into())?;
        Ok(self)
    }

    pub fn limit_to_first(mut self, limit: u32) -> DatabaseResult<Self> {
        if limit == 0 {
            return Err(invalid_argument("limitToFirst must be greater than zero"));
        }
        self.params.set_limit(QueryLimit::First(limit))?;
        Ok(self)
    }

    pub fn limit_to_last(mut self, limit: u32) -> DatabaseResult<Self> {
        if limit == 0 {
            return Err(invalid_argument("limitToLast must be greater than zero"));
        }
        self.params.set_limit(QueryLimit::Last(limit))?;
        Ok(self)
    }

    pub async fn get(&self) -> DatabaseResult<DataSnapshot> {
        let database = &self.reference.database;
        let value = database.read_target(&self.target()).await?;
        Ok(database.snapshot_at(&self.reference.path, value))
    }

    pub async fn add_value_event_listener<L>(&self, listener: L) -> ListenerRegistration
    where
        L: ValueEventListener,
    {
        self.reference
            .database
            .register_listener(self.target(), ListenerKind::Value(Arc::new(listener)))
            .await
    }

    pub async fn add_child_event_listener<L>(&self, listener: L) -> ListenerRegistration
    where
        L: ChildEventListener,
    {
        self.reference
            .database
            .register_listener(self.target(), ListenerKind::Child(Arc::new(listener)))
            .await
    }

    fn target(&self) -> ListenerTarget {
        ListenerTarget {
            path: self.reference.path.clone(),
            params: self.params.clone(),
        }
    }
}

fn normalize_path(path: &str) -> DatabaseResult<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(invalid_argument(
                "Database path cannot contain empty segments",
            ));
        }
        if segment.contains(['.', '#', '$', '[', ']']) {
            return Err(invalid_argument(format!(
                "Database path segment '{segment}' contains an illegal character"
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

fn children_of(value: &Value) -> Vec<(String, Value)> {
    let mut children: Vec<(String, Value)> = match value {
        Value::Object(obj) => obj
            .iter()
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect(),
        Value::Array(array) => array
            .iter()
            .enumerate()
            .filter(|(_, child)| !child.is_null())
            .map(|(index, child)| (index.to_string(), child.clone()))
            .collect(),
        _ => Vec::new(),
    };
    children.sort_by(|(left, _), (right, _)| compare_keys(left, right));
    children
}

fn get_value_at_path(root: &Value, segments: &[String]) -> Option<Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(array) => array.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
