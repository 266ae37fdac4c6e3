//! `LiveDataProxy` (spec §4.8): maps a subtree onto an in-memory cache,
//! queues local mutations, coalesces them into storage writes on a tick,
//! merges remote mutation snapshots back into the cache, and supports
//! nested transactions with rollback.
//!
//! There is no JavaScript `Proxy` trap mechanism in Rust (spec §9 design
//! note): this module replaces property-read/write interception with an
//! explicit path-indexed accessor API (`get`/`set`/`remove`/`push` by
//! relative path string), grounded on `pl3xus_sync`'s mutation-queue +
//! tick-scheduler shape (`SyncState`'s pending-ops list drained on a single
//! coalescing pass) generalized from ECS component diffs to arbitrary JSON
//! subtrees.

use crate::error::{AceError, AceResult};
use crate::event_emitter::SimpleEventEmitter;
use crate::path::{Key, PathInfo};
use crate::reference::{DataReference, RefEvent};
use crate::storage::{Context, GetOptions};
use crate::value::{clone_object, get_mutations, values_are_equal, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    pub default_value: Option<Value>,
    pub cursor: Option<String>,
}

/// Events delivered through `LiveDataProxy::on` (spec §4.8): `'cursor'`,
/// `'mutation'`, `'error'`.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    Cursor(Option<String>),
    Mutation { target: Vec<Key>, value: Value, previous: Value, is_remote: bool },
    Error { message: String, source: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Started,
    Finished,
    Canceled,
}

struct QueuedMutation {
    target: Vec<Key>,
    previous: Value,
}

struct TransactionScope {
    id: u64,
    target: Vec<Key>,
    status: TransactionStatus,
}

struct ProxyState {
    reference: DataReference,
    id: u64,
    cache: Mutex<Value>,
    /// True if the cache was seeded from a `None` root on load — only then
    /// does `apply_change` synthesize missing ancestors instead of treating
    /// them as drift (spec §4.8.2; the `allowCreation` flag is otherwise
    /// hard-coded off per spec §9's open question).
    allow_creation: bool,
    queue: Mutex<Vec<QueuedMutation>>,
    /// Nesting depth of `LiveDataProxy::batch` scopes; `flag_write` only
    /// ticks synchronously at depth 0, so writes inside a batch coalesce
    /// into the single tick the outermost `batch` call runs on exit.
    batch_depth: std::sync::atomic::AtomicU32,
    transactions: Mutex<Vec<TransactionScope>>,
    next_txn_id: std::sync::atomic::AtomicU64,
    events: SimpleEventEmitter<ProxyEvent>,
    destroyed: AtomicBool,
    remote_sub: Mutex<Option<crate::event_stream::Subscription<RefEvent>>>,
}

impl ProxyState {
    fn read_at(&self, cache: &Value, target: &[Key]) -> Value {
        let mut cur = cache;
        for key in target {
            match (key, cur) {
                (Key::Str(k), Value::Object(obj)) => match obj.get(k) {
                    Some(v) => cur = v,
                    None => return Value::Null,
                },
                (Key::Index(i), Value::Array(arr)) => match arr.get(*i) {
                    Some(v) => cur = v,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            }
        }
        cur.clone()
    }

    fn write_at(&self, cache: &mut Value, target: &[Key], value: Value) {
        if target.is_empty() {
            *cache = value;
            return;
        }
        let (head, rest) = (&target[0], &target[1..]);
        match head {
            Key::Str(k) => {
                if !matches!(cache, Value::Object(_)) {
                    *cache = Value::Object(BTreeMap::new());
                }
                let Value::Object(obj) = cache else { unreachable!() };
                if rest.is_empty() {
                    if value.is_void() {
                        obj.remove(k);
                    } else {
                        obj.insert(k.clone(), value);
                    }
                } else {
                    let entry = obj.entry(k.clone()).or_insert(Value::Object(BTreeMap::new()));
                    self.write_at(entry, rest, value);
                }
            }
            Key::Index(i) => {
                if !matches!(cache, Value::Array(_)) {
                    *cache = Value::Array(Vec::new());
                }
                let Value::Array(arr) = cache else { unreachable!() };
                while arr.len() <= *i {
                    arr.push(Value::Null);
                }
                if rest.is_empty() {
                    arr[*i] = value;
                } else {
                    self.write_at(&mut arr[*i], rest, value);
                }
            }
        }
    }

    /// Applies a relative mutation to the cache. Returns `false` ("drift")
    /// if an intermediate ancestor is missing and not creatable.
    fn apply_change(&self, cache: &mut Value, target: &[Key], val: Value) -> bool {
        if target.is_empty() {
            *cache = val;
            return true;
        }
        let ancestors = &target[..target.len() - 1];
        let mut cur = cache;
        for key in ancestors {
            match (key, &mut *cur) {
                (Key::Str(k), Value::Object(obj)) => {
                    if !obj.contains_key(k) {
                        if self.allow_creation {
                            obj.insert(k.clone(), Value::Object(BTreeMap::new()));
                        } else {
                            return false;
                        }
                    }
                    cur = obj.get_mut(k).unwrap();
                }
                (Key::Index(i), Value::Array(arr)) => {
                    if arr.len() <= *i {
                        if self.allow_creation {
                            while arr.len() <= *i {
                                arr.push(Value::Object(BTreeMap::new()));
                            }
                        } else {
                            return false;
                        }
                    }
                    cur = &mut arr[*i];
                }
                _ => return false,
            }
            // `cur` now holds the ancestor's existing value. If it isn't a
            // container, there's nowhere to descend further for the
            // remaining keys: a scalar blocking the path is drift, not a
            // missing-key case `allow_creation` covers (spec scenario 5).
            if !matches!(cur, Value::Object(_) | Value::Array(_)) {
                return false;
            }
        }
        self.write_at(cur, std::slice::from_ref(target.last().unwrap()), val);
        true
    }

    fn emit(&self, event: &str, value: ProxyEvent) {
        let _ = self.events.emit(event, value);
    }

    /// Reconciles the cache with storage from scratch, replaying the
    /// difference as synthetic `'mutation'` events (spec scenario 5).
    fn reload(self: &Arc<Self>) -> AceResult<()> {
        let fresh = self.reference.get(GetOptions::default())?;
        let before = self.cache.lock().unwrap().clone();
        let after = fresh.val().cloned().unwrap_or(Value::Null);
        let diffs = get_mutations(&before, &after, true);
        *self.cache.lock().unwrap() = after;
        for m in diffs {
            self.emit("mutation", ProxyEvent::Mutation { target: m.target, value: m.val, previous: m.prev, is_remote: true });
        }
        Ok(())
    }
}

/// Proxies a subtree of the database onto an in-memory cache (spec §4.8).
pub struct LiveDataProxy {
    state: Arc<ProxyState>,
}

impl LiveDataProxy {
    pub fn create(reference: DataReference, options: ProxyOptions) -> AceResult<LiveDataProxy> {
        let get_options = GetOptions { cursor: options.cursor.clone(), ..GetOptions::default() };
        let snap = reference.get(get_options)?;
        let loaded_root_is_void = snap.val().is_none();
        let initial = match (snap.val(), &options.default_value) {
            (Some(v), _) => v.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) => Value::Null,
        };

        let id = reference_context_next_id(&reference);
        let state = Arc::new(ProxyState {
            reference: reference.clone(),
            id,
            cache: Mutex::new(initial.clone()),
            allow_creation: loaded_root_is_void,
            queue: Mutex::new(Vec::new()),
            batch_depth: std::sync::atomic::AtomicU32::new(0),
            transactions: Mutex::new(Vec::new()),
            next_txn_id: std::sync::atomic::AtomicU64::new(0),
            events: SimpleEventEmitter::new(),
            destroyed: AtomicBool::new(false),
            remote_sub: Mutex::new(None),
        });

        if loaded_root_is_void && options.default_value.is_some() {
            let context = Context::new().with_proxy_origin(id, "set");
            reference.context().storage.set(reference.path(), initial, context)?;
        }

        let proxy = LiveDataProxy { state: Arc::clone(&state) };
        proxy.attach_remote_intake()?;
        Ok(proxy)
    }

    fn attach_remote_intake(&self) -> AceResult<()> {
        let state = Arc::clone(&self.state);
        let stream = self.state.reference.on("mutations", false)?;
        let sub = stream.subscribe(
            move |event| {
                let RefEvent::Mutations(snap) = event else { return };
                if snap.context().proxy_origin_id() == Some(state.id as i64) {
                    return;
                }
                let mutations: Vec<_> = snap.mutations().to_vec();
                for m in mutations {
                    let mut cache = state.cache.lock().unwrap();
                    let applied = state.apply_change(&mut cache, &m.target, m.val.clone());
                    drop(cache);
                    if applied {
                        state.emit("mutation", ProxyEvent::Mutation { target: m.target.clone(), value: m.val.clone(), previous: m.prev.clone(), is_remote: true });
                    } else {
                        let _ = state.reload();
                    }
                }
                if let Some(cursor) = snap.context().cursor() {
                    state.emit("cursor", ProxyEvent::Cursor(Some(cursor)));
                }
            },
            None,
        )?;
        *self.state.remote_sub.lock().unwrap() = Some(sub);
        Ok(())
    }

    pub fn reference(&self) -> &DataReference {
        &self.state.reference
    }

    pub fn cursor(&self) -> Option<String> {
        self.state.reference.cursor()
    }

    pub fn has_value(&self) -> bool {
        !self.state.cache.lock().unwrap().is_void()
    }

    pub fn value(&self) -> Value {
        self.state.cache.lock().unwrap().clone()
    }

    /// Re-fetches from storage and replaces the cache, discarding any
    /// pending local mutations.
    pub fn reload(&self) -> AceResult<()> {
        self.state.reload()
    }

    pub fn destroy(&self) {
        self.state.destroyed.store(true, Ordering::SeqCst);
        if let Some(sub) = self.state.remote_sub.lock().unwrap().take() {
            sub.stop();
        }
    }

    fn guard_alive(&self) -> AceResult<()> {
        if self.state.destroyed.load(Ordering::SeqCst) {
            return Err(AceError::ProxyDestroyed);
        }
        Ok(())
    }

    pub fn on(&self, event: &str, cb: impl Fn(&ProxyEvent) + Send + Sync + 'static) {
        self.state.events.on(event, move |v: &ProxyEvent| cb(v));
    }

    /// Reads the value at `path`, relative to the proxied root.
    pub fn get(&self, path: &str) -> AceResult<Value> {
        self.guard_alive()?;
        let target = PathInfo::get(path)?;
        let cache = self.state.cache.lock().unwrap();
        Ok(self.state.read_at(&cache, target.keys()))
    }

    /// Writes `value` at `path`. Deep-clones `value`; no-ops if the cache
    /// already holds a structurally equal value (spec §4.8 property-write
    /// rule). Flags the nearest array ancestor for rewrite if `path` passes
    /// through an integer index, else flags `path` itself.
    pub fn set(&self, path: &str, value: Value) -> AceResult<()> {
        self.guard_alive()?;
        // Non-integer string indices on arrays are rejected by construction:
        // PathInfo only ever parses `[n]` as Key::Index, never a string key on
        // an array target, so no separate guard is needed here.
        let target = PathInfo::get(path)?;
        let cloned = clone_object(&value)?;
        {
            let cache = self.state.cache.lock().unwrap();
            let current = self.state.read_at(&cache, target.keys());
            if values_are_equal(&current, &cloned) {
                return Ok(());
            }
        }
        self.flag_write(target.keys().to_vec(), cloned)
    }

    pub fn remove(&self, path: &str) -> AceResult<()> {
        self.set(path, Value::Null)
    }

    /// Appends `item` under a fresh id (object-collection append, spec
    /// scenario 4). Returns the minted id.
    pub fn push(&self, path: &str, item: Value) -> AceResult<String> {
        self.guard_alive()?;
        let id = self.state.reference.context().id_generator.next_id();
        let mut target = PathInfo::get(path)?.keys().to_vec();
        target.push(Key::Str(id.clone()));
        self.flag_write(target, item)?;
        Ok(id)
    }

    fn flag_write(&self, target: Vec<Key>, value: Value) -> AceResult<()> {
        let previous = {
            let cache = self.state.cache.lock().unwrap();
            self.state.read_at(&cache, &target)
        };
        {
            let mut cache = self.state.cache.lock().unwrap();
            self.state.write_at(&mut cache, &target, value);
        }
        {
            let mut queue = self.state.queue.lock().unwrap();
            if !queue.iter().any(|m| m.target == target) {
                queue.push(QueuedMutation { target: target.clone(), previous });
            }
        }
        let scoped = self.is_scoped_by_transaction(&target);
        let batched = self.state.batch_depth.load(Ordering::SeqCst) > 0;
        if !scoped && !batched {
            self.tick()?;
        }
        Ok(())
    }

    /// Runs `f` with synchronous per-write ticking suppressed, then issues a
    /// single tick: several `set`/`push`/`remove` calls made inside `f`
    /// coalesce into one storage write per touched parent, instead of one
    /// write per call (spec §4.8.1). Nests: only the outermost `batch` call
    /// ticks.
    pub fn batch(&self, f: impl FnOnce(&LiveDataProxy)) -> AceResult<()> {
        self.state.batch_depth.fetch_add(1, Ordering::SeqCst);
        f(self);
        let depth = self.state.batch_depth.fetch_sub(1, Ordering::SeqCst) - 1;
        if depth == 0 {
            self.tick()?;
        }
        Ok(())
    }

    fn is_scoped_by_transaction(&self, target: &[Key]) -> bool {
        let transactions = self.state.transactions.lock().unwrap();
        let target_path = PathInfo::from_keys(target.to_vec());
        transactions.iter().any(|t| {
            let txn_path = PathInfo::from_keys(t.target.clone());
            t.status == TransactionStatus::Started && (txn_path.equals(&target_path) || txn_path.is_ancestor_of(&target_path))
        })
    }

    /// Drains every queued mutation not currently held back by a
    /// transaction, coalesces it into storage writes, and publishes the
    /// corresponding `'mutation'` events (spec §4.8.1).
    fn tick(&self) -> AceResult<()> {
        let batch: Vec<QueuedMutation> = {
            let mut queue = self.state.queue.lock().unwrap();
            let mut batch = Vec::new();
            let mut remaining = Vec::new();
            for m in queue.drain(..) {
                if self.is_scoped_by_transaction(&m.target) {
                    remaining.push(m);
                } else {
                    batch.push(m);
                }
            }
            *queue = remaining;
            batch
        };
        if batch.is_empty() {
            return Ok(());
        }

        // Step 2-3: stamp with the current value, publish mutation events.
        let mut stamped: Vec<(Vec<Key>, Value, Value)> = Vec::new();
        for m in &batch {
            let current = {
                let cache = self.state.cache.lock().unwrap();
                self.state.read_at(&cache, &m.target)
            };
            self.state.emit("mutation", ProxyEvent::Mutation { target: m.target.clone(), value: current.clone(), previous: m.previous.clone(), is_remote: false });
            stamped.push((m.target.clone(), current, m.previous.clone()));
        }

        // Step 4: compress — drop mutations shadowed by an ancestor in the batch.
        let compressed: Vec<&(Vec<Key>, Value, Value)> = stamped
            .iter()
            .filter(|(target, _, _)| {
                let target_path = PathInfo::from_keys(target.clone());
                !stamped.iter().any(|(other, _, _)| {
                    other != target && PathInfo::from_keys(other.clone()).is_ancestor_of(&target_path)
                })
            })
            .collect();

        // Step 5: group into storage writes — root write becomes `set`, else group by parent.
        let mut grouped: BTreeMap<Vec<Key>, BTreeMap<String, Value>> = BTreeMap::new();
        let mut root_write: Option<Value> = None;
        for (target, value, _) in &compressed {
            if target.is_empty() {
                root_write = Some(value.clone());
                continue;
            }
            let parent = target[..target.len() - 1].to_vec();
            let key = match target.last().unwrap() {
                Key::Str(s) => s.clone(),
                Key::Index(i) => i.to_string(),
            };
            grouped.entry(parent).or_default().insert(key, value.clone());
        }

        // Step 6: serialize writes in order, stamped with proxy-origin context.
        let mut failure: Option<(Vec<(Vec<Key>, Value)>, AceError)> = None;
        if let Some(value) = root_write {
            let context = Context::new().with_proxy_origin(self.state.id, "set");
            match self.state.reference.context().storage.set(self.state.reference.path(), value, context) {
                Ok(result) => {
                    if let Some(cursor) = result.cursor {
                        self.state.emit("cursor", ProxyEvent::Cursor(Some(cursor)));
                    }
                }
                Err(e) => failure = Some((compressed.iter().map(|(t, _, p)| (t.clone(), p.clone())).collect(), e)),
            }
        }
        if failure.is_none() {
            for (parent, updates) in &grouped {
                let parent_path = self.state.reference.path().child(parent.clone())?;
                let context = Context::new().with_proxy_origin(self.state.id, "update");
                match self.state.reference.context().storage.update(&parent_path, updates.clone(), context) {
                    Ok(result) => {
                        if let Some(cursor) = result.cursor {
                            self.state.emit("cursor", ProxyEvent::Cursor(Some(cursor)));
                        }
                    }
                    Err(e) => {
                        let rollback: Vec<(Vec<Key>, Value)> = compressed
                            .iter()
                            .filter(|(t, _, _)| t.starts_with(parent.as_slice()))
                            .map(|(t, _, p)| (t.clone(), p.clone()))
                            .collect();
                        failure = Some((rollback, e));
                        break;
                    }
                }
            }
        }

        // Step 7: roll back on failure.
        if let Some((rollback, error)) = failure {
            for (target, previous) in &rollback {
                let mut cache = self.state.cache.lock().unwrap();
                let reverted = previous.clone();
                self.state.write_at(&mut cache, target, reverted.clone());
                drop(cache);
                self.state.emit("mutation", ProxyEvent::Mutation { target: target.clone(), value: reverted, previous: Value::Null, is_remote: false });
            }
            self.state.emit("error", ProxyEvent::Error { message: error.to_string(), source: "update" });
        }
        Ok(())
    }

    /// Registers a handler scoped to `path` (relative to the proxied root).
    /// Invoked with the new and previous values of the smallest enclosing
    /// change whenever a local or remote mutation touches `path` or a
    /// descendant (spec §4.8.3).
    pub fn on_change(&self, path: &str, cb: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> AceResult<()> {
        let scope = PathInfo::get(path)?.keys().to_vec();
        let state = Arc::clone(&self.state);
        self.state.events.on("mutation", move |event: &ProxyEvent| {
            let ProxyEvent::Mutation { target, value, previous, .. } = event else { return };
            let target_path = PathInfo::from_keys(target.clone());
            let scope_path = PathInfo::from_keys(scope.clone());
            if !(target_path.is_on_trail_of(&scope_path)) {
                return;
            }
            let (new_val, prev_val) = if target.len() <= scope.len() {
                let suffix = &scope[target.len()..];
                (read_into(value, suffix), read_into(previous, suffix))
            } else {
                let cache = state.cache.lock().unwrap();
                let current = state.read_at(&cache, &scope);
                drop(cache);
                let mut prior = current.clone();
                write_into(&mut prior, &target[scope.len().min(target.len())..], previous.clone());
                (current, prior)
            };
            cb(&new_val, &prev_val);
        });
        Ok(())
    }

    /// Begins a transaction scoped at `path`; rejects if any existing
    /// transaction's scope overlaps (spec §4.8.4).
    pub fn start_transaction(&self, path: &str) -> AceResult<ProxyTransaction> {
        let target = PathInfo::get(path)?.keys().to_vec();
        let target_path = PathInfo::from_keys(target.clone());
        {
            let mut transactions = self.state.transactions.lock().unwrap();
            for t in transactions.iter() {
                if t.status != TransactionStatus::Started {
                    continue;
                }
                let existing_path = PathInfo::from_keys(t.target.clone());
                if existing_path.equals(&target_path) || existing_path.is_ancestor_of(&target_path) || target_path.is_ancestor_of(&existing_path) {
                    return Err(AceError::TransactionConflict { reason: format!("an overlapping transaction is already open at {}", existing_path.path()) });
                }
            }
            let id = self.state.next_txn_id.fetch_add(1, Ordering::SeqCst);
            transactions.push(TransactionScope { id, target: target.clone(), status: TransactionStatus::Started });
        }
        // Draining in-scope mutations queued before the transaction opened
        // ensures the transaction only ever holds back mutations flagged
        // after this point.
        self.tick()?;
        let id = {
            let transactions = self.state.transactions.lock().unwrap();
            transactions.last().unwrap().id
        };
        Ok(ProxyTransaction { proxy_state: Arc::clone(&self.state), target, id })
    }

    /// Wraps `path`'s subtree value changes in an `Observable`, emitting the
    /// current value immediately and on every subsequent mutation in scope
    /// (spec §4.8.5 option (d)).
    pub fn observe(&self, path: &str) -> AceResult<crate::observable::Observable<Value>> {
        let scope = PathInfo::get(path)?.keys().to_vec();
        let state = Arc::clone(&self.state);
        Ok(crate::observable::Observable::new(move |broadcast| {
            let current = {
                let cache = state.cache.lock().unwrap();
                state.read_at(&cache, &scope)
            };
            broadcast(&current);
            let scope2 = scope.clone();
            let state2 = Arc::clone(&state);
            let broadcast2 = Arc::clone(&broadcast);
            state.events.on("mutation", move |event: &ProxyEvent| {
                let ProxyEvent::Mutation { target, .. } = event else { return };
                let target_path = PathInfo::from_keys(target.clone());
                let scope_path = PathInfo::from_keys(scope2.clone());
                if target_path.is_on_trail_of(&scope_path) {
                    let cache = state2.cache.lock().unwrap();
                    let value = state2.read_at(&cache, &scope2);
                    drop(cache);
                    broadcast2(&value);
                }
            });
            Box::new(|| {})
        }))
    }

    /// Wraps the object collection at `path` in an `OrderedCollectionProxy`,
    /// persisting every reorder back through `set` (spec §4.8.5).
    pub fn ordered_collection(&self, path: &str, order_property: &str, order_increment: i64) -> AceResult<OrderedCollectionProxy> {
        let value = self.get(path)?;
        let Value::Object(collection) = value else {
            return Err(AceError::ProxyTypeViolation { reason: format!("{path} is not an object collection") });
        };
        let order_property = order_property.to_string();
        let path_owned = path.to_string();
        let state = Arc::clone(&self.state);
        let persist: PersistFn = Arc::new(move |updated: BTreeMap<String, Value>| {
            let target = PathInfo::get(&path_owned)?.keys().to_vec();
            let mut cache = state.cache.lock().unwrap();
            state.write_at(&mut cache, &target, Value::Object(updated));
            drop(cache);
            let mut queue = state.queue.lock().unwrap();
            if !queue.iter().any(|m| m.target == target) {
                queue.push(QueuedMutation { target, previous: Value::Null });
            }
            Ok(())
        });
        Ok(OrderedCollectionProxy::new(collection, order_property, order_increment, persist))
    }
}

fn read_into(value: &Value, suffix: &[Key]) -> Value {
    let mut cur = value;
    for key in suffix {
        match (key, cur) {
            (Key::Str(k), Value::Object(obj)) => match obj.get(k) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            (Key::Index(i), Value::Array(arr)) => match arr.get(*i) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    cur.clone()
}

fn write_into(root: &mut Value, suffix: &[Key], value: Value) {
    if suffix.is_empty() {
        *root = value;
        return;
    }
    let (head, rest) = (&suffix[0], &suffix[1..]);
    match head {
        Key::Str(k) => {
            if !matches!(root, Value::Object(_)) {
                *root = Value::Object(BTreeMap::new());
            }
            let Value::Object(obj) = root else { unreachable!() };
            let entry = obj.entry(k.clone()).or_insert(Value::Null);
            write_into(entry, rest, value);
        }
        Key::Index(i) => {
            if !matches!(root, Value::Array(_)) {
                *root = Value::Array(Vec::new());
            }
            let Value::Array(arr) = root else { unreachable!() };
            while arr.len() <= *i {
                arr.push(Value::Null);
            }
            write_into(&mut arr[*i], rest, value);
        }
    }
}

fn reference_context_next_id(reference: &DataReference) -> u64 {
    reference.context_next_proxy_id()
}

/// A scoped hold on local mutation draining; mutations flagged within the
/// scope queue instead of flushing until `commit()` or `rollback()` (spec
/// §4.8.4).
pub struct ProxyTransaction {
    proxy_state: Arc<ProxyState>,
    target: Vec<Key>,
    id: u64,
}

impl ProxyTransaction {
    pub fn has_mutations(&self) -> bool {
        let queue = self.proxy_state.queue.lock().unwrap();
        let scope_path = PathInfo::from_keys(self.target.clone());
        queue.iter().any(|m| {
            let target_path = PathInfo::from_keys(m.target.clone());
            scope_path.equals(&target_path) || scope_path.is_ancestor_of(&target_path)
        })
    }

    pub fn status(&self) -> TransactionStatus {
        let transactions = self.proxy_state.transactions.lock().unwrap();
        transactions.iter().find(|t| t.id == self.id).map(|t| t.status.clone()).unwrap_or(TransactionStatus::Finished)
    }

    pub fn completed(&self) -> bool {
        self.status() != TransactionStatus::Started
    }

    /// Marks the transaction finished and flushes its held-back mutations.
    pub fn commit(&self) -> AceResult<()> {
        {
            let mut transactions = self.proxy_state.transactions.lock().unwrap();
            if let Some(t) = transactions.iter_mut().find(|t| t.id == self.id) {
                t.status = TransactionStatus::Finished;
            }
        }
        let proxy = LiveDataProxy { state: Arc::clone(&self.proxy_state) };
        proxy.tick()
    }

    /// Removes the transaction and replays `cache[target] = previous` for
    /// each mutation in scope, in reverse-queue order.
    pub fn rollback(&self) -> AceResult<()> {
        let scope_path = PathInfo::from_keys(self.target.clone());
        {
            let mut transactions = self.proxy_state.transactions.lock().unwrap();
            transactions.retain(|t| t.id != self.id);
        }
        let mut queue = self.proxy_state.queue.lock().unwrap();
        let mut kept = Vec::new();
        let mut in_scope = Vec::new();
        for m in queue.drain(..) {
            let target_path = PathInfo::from_keys(m.target.clone());
            if scope_path.equals(&target_path) || scope_path.is_ancestor_of(&target_path) {
                in_scope.push(m);
            } else {
                kept.push(m);
            }
        }
        *queue = kept;
        drop(queue);
        for m in in_scope.into_iter().rev() {
            let mut cache = self.proxy_state.cache.lock().unwrap();
            self.proxy_state.write_at(&mut cache, &m.target, m.previous);
        }
        Ok(())
    }
}

type PersistFn = Arc<dyn Fn(BTreeMap<String, Value>) -> AceResult<()> + Send + Sync>;

/// Wraps an object collection (id → item) with an assigned `order_property`,
/// supporting insert/move/delete while keeping order values monotonic where
/// possible (spec §4.8.5).
pub struct OrderedCollectionProxy {
    collection: BTreeMap<String, Value>,
    order_property: String,
    order_increment: i64,
    persist: PersistFn,
}

fn order_of(item: &Value, order_property: &str) -> i64 {
    match item.as_object().and_then(|o| o.get(order_property)) {
        Some(Value::Int(n)) => *n,
        Some(Value::Float(f)) => *f as i64,
        _ => 0,
    }
}

fn with_order(item: &Value, order_property: &str, order: i64) -> Value {
    let mut obj = item.as_object().cloned().unwrap_or_default();
    obj.insert(order_property.to_string(), Value::Int(order));
    Value::Object(obj)
}

impl OrderedCollectionProxy {
    pub fn new(mut collection: BTreeMap<String, Value>, order_property: String, order_increment: i64, persist: PersistFn) -> Self {
        if collection.values().any(|v| v.as_object().is_none_or(|o| !o.contains_key(&order_property))) {
            for (i, (_, item)) in collection.iter_mut().enumerate() {
                *item = with_order(item, &order_property, i as i64 * order_increment);
            }
        }
        OrderedCollectionProxy { collection, order_property, order_increment, persist }
    }

    /// A snapshot sorted by the order property.
    pub fn get_array(&self) -> Vec<(String, Value)> {
        let mut items: Vec<(String, Value)> = self.collection.clone().into_iter().collect();
        items.sort_by_key(|(_, v)| order_of(v, &self.order_property));
        items
    }

    fn persist(&self) -> AceResult<()> {
        (self.persist)(self.collection.clone())
    }

    /// Inserts `item` under a fresh id at sorted position `index` (end if
    /// `None`), or moves `from`'s item there if `from` is given.
    pub fn add(&mut self, id: String, item: Value, index: Option<usize>, from: Option<usize>) -> AceResult<()> {
        let mut ordered = self.get_array();
        if let Some(from) = from {
            if from < ordered.len() {
                ordered.remove(from);
            }
        }
        let order = match index {
            None => ordered.last().map(|(_, v)| order_of(v, &self.order_property)).unwrap_or(0) + self.order_increment,
            Some(0) => ordered.first().map(|(_, v)| order_of(v, &self.order_property)).unwrap_or(0) - self.order_increment,
            Some(i) if i >= ordered.len() => ordered.last().map(|(_, v)| order_of(v, &self.order_property)).unwrap_or(0) + self.order_increment,
            Some(i) => {
                let before = order_of(&ordered[i - 1].1, &self.order_property);
                let after = order_of(&ordered[i].1, &self.order_property);
                if after - before <= 1 {
                    self.resequence();
                    return self.add(id, item, index, None);
                }
                before + (after - before) / 2
            }
        };
        self.collection.insert(id, with_order(&item, &self.order_property, order));
        self.persist()
    }

    /// Deletes the item at sorted position `index`.
    pub fn delete(&mut self, index: usize) -> AceResult<()> {
        let ordered = self.get_array();
        if let Some((id, _)) = ordered.get(index) {
            self.collection.remove(id);
            self.persist()?;
        }
        Ok(())
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> AceResult<()> {
        let ordered = self.get_array();
        let Some((id, item)) = ordered.get(from).cloned() else { return Ok(()) };
        self.add(id, item, Some(to), Some(from))
    }

    fn resequence(&mut self) {
        let mut ordered = self.get_array();
        ordered.sort_by_key(|(_, v)| order_of(v, &self.order_property));
        for (i, (id, item)) in ordered.into_iter().enumerate() {
            self.collection.insert(id, with_order(&item, &self.order_property, i as i64 * self.order_increment));
        }
    }

    /// Re-sequences the collection after sorting with `cmp`.
    pub fn sort(&mut self, mut cmp: impl FnMut(&Value, &Value) -> std::cmp::Ordering) -> AceResult<()> {
        let mut ordered = self.get_array();
        ordered.sort_by(|(_, a), (_, b)| cmp(a, b));
        for (i, (id, item)) in ordered.into_iter().enumerate() {
            self.collection.insert(id, with_order(&item, &self.order_property, i as i64 * self.order_increment));
        }
        self.persist()
    }
}
