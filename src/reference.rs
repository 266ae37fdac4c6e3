//! `DataReference`, `DataSnapshot`, `MutationsDataSnapshot`, and `Query`
//! (spec §4.7): the user-facing façade over `StorageApi`.
//!
//! Grounded on `pl3xus_sync`'s handle-plus-shared-context split (a cheap,
//! cloneable value type wrapping an `Arc` to process-wide registries) applied
//! here to a path instead of an entity id, with the subscription bookkeeping
//! shape borrowed from the same crate's `SubscriptionManager`.

use crate::error::{AceError, AceResult};
use crate::event_emitter::SimpleEventEmitter;
use crate::event_stream::{EventPublisher, EventStream, Subscription};
use crate::id::IdGenerator;
use crate::path::{ChildSegment, PathInfo};
use crate::storage::{
    Context, Cursor, GetOptions, HistoryEntry, HistoryFilter, QueryFilter, QueryOperator, QueryOptions, QueryRow,
    ReflectKind, ReflectRequest, StorageApi,
};
use crate::type_mappings::TypeMappings;
use crate::value::{is_void, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

/// Shared state behind every `DataReference` cloned from the same database:
/// the storage backend, the type-mapping registry, the id generator, and the
/// `'ready'` latch proxies and references await before their first operation.
pub struct AceContext {
    pub storage: Arc<dyn StorageApi>,
    pub type_mappings: Arc<TypeMappings>,
    pub id_generator: Arc<dyn IdGenerator>,
    ready: SimpleEventEmitter<()>,
    proxy_ids: std::sync::atomic::AtomicU64,
}

impl AceContext {
    pub fn new(storage: Arc<dyn StorageApi>, type_mappings: Arc<TypeMappings>, id_generator: Arc<dyn IdGenerator>) -> Arc<Self> {
        Arc::new(AceContext { storage, type_mappings, id_generator, ready: SimpleEventEmitter::new(), proxy_ids: std::sync::atomic::AtomicU64::new(0) })
    }

    /// Latches the database-wide `'ready'` signal; idempotent.
    pub fn mark_ready(&self) {
        let _ = self.ready.emit_once("ready", ());
    }

    /// Invokes `cb` once the database is ready (immediately, if it already
    /// is).
    pub fn on_ready(&self, cb: impl Fn() + Send + Sync + 'static) {
        self.ready.on("ready", move |_| cb());
    }

    pub fn is_ready(&self) -> bool {
        self.ready.has_latched("ready")
    }

    pub(crate) fn next_proxy_id(&self) -> u64 {
        self.proxy_ids.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

struct SubscriptionEntry {
    event: String,
    stream_stop: Box<dyn Fn() + Send + Sync>,
}

/// An immutable handle to a path plus a reference to the shared database
/// context (spec §4.7). Cloning a `DataReference` shares the same
/// subscription list and cursor cell — it is the same logical reference.
#[derive(Clone)]
pub struct DataReference {
    context: Arc<AceContext>,
    path: PathInfo,
    cursor: Arc<Mutex<Cursor>>,
    subscriptions: Arc<Mutex<Vec<SubscriptionEntry>>>,
}

fn guard_not_wildcard(path: &PathInfo) -> AceResult<()> {
    if path.keys().iter().any(|k| k.is_wildcard_or_variable()) {
        return Err(AceError::WildcardNotAllowed { path: path.path() });
    }
    Ok(())
}

fn guard_not_root(path: &PathInfo) -> AceResult<()> {
    if path.is_root() {
        return Err(AceError::PathRule { key: String::new(), reason: "operation not allowed at the root" });
    }
    Ok(())
}

impl DataReference {
    pub fn root(context: Arc<AceContext>) -> Self {
        DataReference { context, path: PathInfo::root(), cursor: Arc::new(Mutex::new(None)), subscriptions: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn at(context: Arc<AceContext>, path: PathInfo) -> Self {
        DataReference { context, path, cursor: Arc::new(Mutex::new(None)), subscriptions: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn path(&self) -> &PathInfo {
        &self.path
    }

    /// The shared database context backing this reference (storage, type
    /// mappings, id generator). Exposed so sibling modules (`proxy`) can
    /// reach the storage backend without duplicating it.
    pub fn context(&self) -> &Arc<AceContext> {
        &self.context
    }

    pub fn key(&self) -> String {
        self.path.key_string()
    }

    pub fn parent(&self) -> Option<DataReference> {
        self.path.parent().map(|p| DataReference::at(Arc::clone(&self.context), p))
    }

    pub fn child(&self, segment: impl Into<ChildSegment>) -> AceResult<DataReference> {
        Ok(DataReference::at(Arc::clone(&self.context), self.path.child(segment)?))
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor.lock().unwrap().clone()
    }

    fn note_cursor(&self, context: &Context) {
        if let Some(cursor) = context.cursor() {
            *self.cursor.lock().unwrap() = Some(cursor);
        }
    }

    /// Runs `value` through the type mapping bound to this path's immediate
    /// container, if any: `creator` deserializes it into the bound type and
    /// `serializer` immediately turns the instance back into a plain value,
    /// so the stored representation is always the one the bound type's own
    /// serializer produces. A path with no bound mapping passes through
    /// unchanged.
    ///
    /// Only the single mapping bound directly to this path's container is
    /// applied (the same match `TypeMappings::map` returns); a mapping bound
    /// deeper inside the written subtree (reachable only via `map_deep`) is
    /// not independently re-serialized. See DESIGN.md.
    fn map_out(&self, value: &Value) -> AceResult<Value> {
        let Some(handle) = self.context.type_mappings.map(&self.path) else {
            return Ok(value.clone());
        };
        self.context.type_mappings.with(&handle, |m| {
            let instance = m.create(value)?;
            m.serialize(&*instance)
        })
    }

    /// The load-side counterpart of `map_out`, applied to a value freshly
    /// read from storage.
    fn map_in(&self, value: Value) -> AceResult<Value> {
        let Some(handle) = self.context.type_mappings.map(&self.path) else {
            return Ok(value);
        };
        self.context.type_mappings.with(&handle, |m| {
            let instance = m.create(&value)?;
            m.serialize(&*instance)
        })
    }

    pub fn get(&self, options: GetOptions) -> AceResult<DataSnapshot> {
        guard_not_wildcard(&self.path)?;
        let result = self.context.storage.get(&self.path, &options)?;
        self.note_cursor(&result.context);
        let value = match result.value {
            Some(v) => Some(self.map_in(v)?),
            None => None,
        };
        Ok(DataSnapshot { reference: self.clone(), value, previous: None, context: result.context })
    }

    pub fn set(&self, value: Value) -> AceResult<()> {
        guard_not_wildcard(&self.path)?;
        guard_not_root(&self.path)?;
        let mapped = self.map_out(&value)?;
        let result = self.context.storage.set(&self.path, mapped, Context::new())?;
        self.note_cursor_from_write(&result.cursor);
        Ok(())
    }

    fn note_cursor_from_write(&self, cursor: &Cursor) {
        if let Some(c) = cursor {
            *self.cursor.lock().unwrap() = Some(c.clone());
        }
    }

    /// If `updates` is not an object, delegates to `set`.
    pub fn update(&self, updates: Value) -> AceResult<()> {
        guard_not_wildcard(&self.path)?;
        let Value::Object(obj) = updates else {
            return self.set(updates);
        };
        let result = self.context.storage.update(&self.path, obj, Context::new())?;
        self.note_cursor_from_write(&result.cursor);
        Ok(())
    }

    /// Runs a storage transaction: `f` receives the current value (or
    /// `None`) and returns the value to write, or `None` to leave it
    /// unchanged.
    pub fn transaction(&self, mut f: impl FnMut(Option<Value>) -> AceResult<Option<Value>>) -> AceResult<DataSnapshot> {
        guard_not_wildcard(&self.path)?;
        let result = self.context.storage.transaction(&self.path, &mut f, Context::new())?;
        self.note_cursor_from_write(&result.cursor);
        self.get(GetOptions::default())
    }

    /// Mints a new id and optionally writes `value` under it.
    pub fn push(&self, value: Option<Value>) -> AceResult<DataReference> {
        guard_not_wildcard(&self.path)?;
        let id = self.context.id_generator.next_id();
        let child = self.child(id.as_str())?;
        if let Some(value) = value {
            child.set(value)?;
        }
        Ok(child)
    }

    pub fn remove(&self) -> AceResult<()> {
        guard_not_root(&self.path)?;
        self.set(Value::Null)
    }

    pub fn exists(&self) -> AceResult<bool> {
        guard_not_wildcard(&self.path)?;
        self.context.storage.exists(&self.path)
    }

    pub fn count(&self, options: QueryOptions) -> AceResult<usize> {
        guard_not_wildcard(&self.path)?;
        self.context.storage.count(&self.path, &options)
    }

    pub fn reflect(&self, kind: ReflectKind, limit: usize, skip: usize) -> AceResult<(Vec<String>, bool)> {
        guard_not_wildcard(&self.path)?;
        let result = self.context.storage.reflect(&self.path, ReflectRequest { kind, limit, skip })?;
        Ok((result.list, result.more))
    }

    pub fn export(&self, writer: &mut dyn Write) -> AceResult<()> {
        guard_not_wildcard(&self.path)?;
        self.context.storage.export(&self.path, writer)
    }

    pub fn import(&self, reader: &mut dyn Read) -> AceResult<()> {
        guard_not_wildcard(&self.path)?;
        self.context.storage.import(&self.path, reader)
    }

    pub fn get_mutations(&self, filter: HistoryFilter) -> AceResult<Vec<HistoryEntry>> {
        self.context.storage.get_mutations(&filter)
    }

    pub fn get_changes(&self, filter: HistoryFilter) -> AceResult<Vec<HistoryEntry>> {
        self.context.storage.get_changes(&filter)
    }

    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    /// Subscribes to `event` (spec §4.7.1): `"value"`, `"child_added"`,
    /// `"child_changed"`, `"child_removed"`, `"mutations"`, `"mutated"`, or
    /// a `"notify_*"` variant. `new_only` skips the synthetic backfill that
    /// would otherwise replay the current state once on activation.
    pub fn on(&self, event: &str, new_only: bool) -> AceResult<EventStream<RefEvent>> {
        let event = event.to_string();
        let has_wildcard = self.path.keys().iter().any(|k| k.is_wildcard_or_variable());
        let new_only = new_only || has_wildcard;
        let reference = self.clone();
        let event_for_storage = event.clone();
        let event_for_backfill = event.clone();

        let stream = EventStream::new(move |publisher: EventPublisher<RefEvent>| {
            let reference2 = reference.clone();
            let pub2 = publisher.clone();
            let event3 = event_for_storage.clone();
            let subscribe_result = reference.context.storage.subscribe(
                &reference.path,
                &event_for_storage,
                Box::new(move |raw| {
                    if let Some(ev) = translate_event(&event3, &reference2, raw) {
                        pub2.publish(ev);
                    }
                }),
            );
            match subscribe_result {
                Ok(_subscription_id) => {
                    publisher.start(|| {});
                    if !new_only {
                        backfill(&event_for_backfill, &reference, &publisher);
                    }
                }
                Err(e) => publisher.cancel(e.to_string()),
            }
        });

        Ok(stream)
    }

    /// Removes every subscription registered through `on` for `event`
    /// (every event's subscription if `event` is `None`).
    pub fn off(&self, event: Option<&str>) {
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(event) = event {
            let before = subs.len();
            subs.retain(|s| {
                if s.event == event {
                    (s.stream_stop)();
                    false
                } else {
                    true
                }
            });
            if subs.len() == before {
                log::warn!("off({event}) called on {} with no matching subscription", self.path.path());
            }
        } else {
            for s in subs.drain(..) {
                (s.stream_stop)();
            }
        }
    }

    /// Registers `stream`'s stop handle under `event` so a later `off` call
    /// can find it. Call this after `on` if you need `off` support; `on`
    /// alone does not retain the stream (callers who keep their own handle
    /// do not need to).
    pub fn track_subscription(&self, event: &str, stream: Subscription<RefEvent>) {
        let stream = Arc::new(stream);
        self.subscriptions.lock().unwrap().push(SubscriptionEntry {
            event: event.to_string(),
            stream_stop: Box::new(move || stream.stop()),
        });
    }

    pub fn proxy(&self, options: crate::proxy::ProxyOptions) -> AceResult<crate::proxy::LiveDataProxy> {
        crate::proxy::LiveDataProxy::create(self.clone(), options)
    }

    /// A fresh id for a proxy created on this database, unique within the
    /// process; used to stamp proxy-originated writes (spec §4.8.1).
    pub fn context_next_proxy_id(&self) -> u64 {
        self.context.next_proxy_id()
    }

    /// Streams every child sequentially: lists keys via `reflect`, then
    /// fetches and delivers each child in turn. Stops on the first `cb`
    /// returning `false`.
    pub fn for_each(&self, options: GetOptions, mut cb: impl FnMut(DataSnapshot) -> bool) -> AceResult<ForEachResult> {
        guard_not_wildcard(&self.path)?;
        let (keys, _more) = self.reflect(ReflectKind::Children, 0, 0)?;
        let mut processed = 0usize;
        let mut canceled = false;
        for key in &keys {
            let child = self.child(key.as_str())?;
            let snap = child.get(options.clone())?;
            processed += 1;
            if !cb(snap) {
                canceled = true;
                break;
            }
        }
        Ok(ForEachResult { canceled, total: keys.len(), processed })
    }
}

pub struct ForEachResult {
    pub canceled: bool,
    pub total: usize,
    pub processed: usize,
}

/// Events delivered through `DataReference::on` (spec §4.7.1).
pub enum RefEvent {
    Value(DataSnapshot),
    ChildAdded(DataSnapshot),
    ChildChanged(DataSnapshot),
    ChildRemoved(DataSnapshot),
    Mutations(MutationsDataSnapshot),
    Mutated(Option<DataSnapshot>),
    NotifyChildAdded(DataReference),
    NotifyChildChanged(DataReference),
    NotifyChildRemoved(DataReference),
    NotifyValue(DataReference),
}

fn translate_event(event: &str, reference: &DataReference, raw: crate::storage::RawMutationEvent) -> Option<RefEvent> {
    reference.note_cursor(&raw.context);
    let event_ref = DataReference::at(Arc::clone(&reference.context), raw.path.clone());
    match event {
        "value" => Some(RefEvent::Value(DataSnapshot { reference: event_ref, value: raw.new_value, previous: raw.old_value, context: raw.context })),
        "child_added" => Some(RefEvent::ChildAdded(DataSnapshot { reference: event_ref, value: raw.new_value, previous: raw.old_value, context: raw.context })),
        "child_changed" => Some(RefEvent::ChildChanged(DataSnapshot { reference: event_ref, value: raw.new_value, previous: raw.old_value, context: raw.context })),
        "child_removed" => Some(RefEvent::ChildRemoved(DataSnapshot { reference: event_ref, value: raw.old_value.clone(), previous: raw.old_value, context: raw.context })),
        "mutated" => {
            if is_void(raw.new_value.as_ref()) {
                Some(RefEvent::Mutated(None))
            } else {
                Some(RefEvent::Mutated(Some(DataSnapshot { reference: event_ref, value: raw.new_value, previous: raw.old_value, context: raw.context })))
            }
        }
        "mutations" => {
            let target = raw.path.keys()[reference.path.keys().len().min(raw.path.keys().len())..].to_vec();
            let mutation = crate::value::Mutation { target, prev: raw.old_value.unwrap_or(Value::Null), val: raw.new_value.unwrap_or(Value::Null) };
            Some(RefEvent::Mutations(MutationsDataSnapshot { reference: reference.clone(), mutations: vec![mutation], context: raw.context }))
        }
        "notify_child_added" => Some(RefEvent::NotifyChildAdded(event_ref)),
        "notify_child_changed" => Some(RefEvent::NotifyChildChanged(event_ref)),
        "notify_child_removed" => Some(RefEvent::NotifyChildRemoved(event_ref)),
        "notify_value" => Some(RefEvent::NotifyValue(event_ref)),
        _ => None,
    }
}

fn backfill(event: &str, reference: &DataReference, publisher: &EventPublisher<RefEvent>) {
    match event {
        "value" => {
            if let Ok(snap) = reference.get(GetOptions::default()) {
                publisher.publish(RefEvent::Value(snap));
            }
        }
        "child_added" => {
            if let Ok(snap) = reference.get(GetOptions::default()) {
                if let Some(obj) = snap.value.as_ref().and_then(Value::as_object) {
                    for key in obj.keys() {
                        if let Ok(child) = reference.child(key.as_str()) {
                            if let Ok(child_snap) = child.get(GetOptions::default()) {
                                publisher.publish(RefEvent::ChildAdded(child_snap));
                            }
                        }
                    }
                }
            }
        }
        "notify_child_added" => {
            let mut skip = 0usize;
            loop {
                let Ok((keys, more)) = reference.reflect(ReflectKind::Children, 100, skip) else { break };
                for key in &keys {
                    if let Ok(child) = reference.child(key.as_str()) {
                        publisher.publish(RefEvent::NotifyChildAdded(child));
                    }
                }
                skip += keys.len();
                if !more || keys.is_empty() {
                    break;
                }
            }
        }
        _ => {}
    }
}

/// An immutable view of a value at a specific path and context (spec §4.7).
#[derive(Clone)]
pub struct DataSnapshot {
    reference: DataReference,
    value: Option<Value>,
    previous: Option<Value>,
    context: Context,
}

impl DataSnapshot {
    pub fn reference(&self) -> &DataReference {
        &self.reference
    }

    pub fn val(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn previous(&self) -> AceResult<Option<&Value>> {
        Ok(self.previous.as_ref())
    }

    pub fn exists(&self) -> bool {
        !is_void(self.value.as_ref())
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn key(&self) -> String {
        self.reference.key()
    }

    pub fn child(&self, segment: impl Into<ChildSegment>) -> AceResult<DataSnapshot> {
        let segment = segment.into();
        let child_ref = self.reference.child(clone_segment(&segment))?;
        let key = match &segment {
            ChildSegment::Path(p) => p.clone(),
            ChildSegment::Index(i) => i.to_string(),
            ChildSegment::Keys(_) => child_ref.key(),
        };
        let child_value = self.value.as_ref().and_then(|v| v.as_object()).and_then(|o| o.get(&key)).cloned();
        Ok(DataSnapshot { reference: child_ref, value: child_value, previous: None, context: self.context.clone() })
    }

    pub fn has_child(&self, key: &str) -> bool {
        self.value.as_ref().and_then(Value::as_object).is_some_and(|o| o.contains_key(key))
    }

    pub fn has_children(&self) -> bool {
        match &self.value {
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            _ => false,
        }
    }

    pub fn num_children(&self) -> usize {
        match &self.value {
            Some(Value::Object(o)) => o.len(),
            Some(Value::Array(a)) => a.len(),
            _ => 0,
        }
    }

    pub fn for_each(&self, mut cb: impl FnMut(DataSnapshot) -> bool) -> AceResult<()> {
        let Some(Value::Object(obj)) = &self.value else { return Ok(()) };
        for key in obj.keys() {
            let child = self.child(key.as_str())?;
            if !cb(child) {
                break;
            }
        }
        Ok(())
    }
}

fn clone_segment(segment: &ChildSegment) -> ChildSegment {
    match segment {
        ChildSegment::Path(p) => ChildSegment::Path(p.clone()),
        ChildSegment::Index(i) => ChildSegment::Index(*i),
        ChildSegment::Keys(ks) => ChildSegment::Keys(ks.clone()),
    }
}

/// Specializes `DataSnapshot` for a value that is itself an ordered list of
/// mutation descriptors (spec §4.7): `for_each` yields one snapshot per
/// mutation; `previous()` has no single answer and raises `UseIndividualPrev`.
pub struct MutationsDataSnapshot {
    reference: DataReference,
    mutations: Vec<crate::value::Mutation>,
    context: Context,
}

impl MutationsDataSnapshot {
    pub fn reference(&self) -> &DataReference {
        &self.reference
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn previous(&self) -> AceResult<Option<&Value>> {
        Err(AceError::UseIndividualPrev)
    }

    pub fn mutations(&self) -> &[crate::value::Mutation] {
        &self.mutations
    }

    pub fn for_each(&self, mut cb: impl FnMut(DataSnapshot) -> bool) -> AceResult<()> {
        for m in &self.mutations {
            let child_ref = self.reference.child(m.target.clone())?;
            let value = if m.val.is_void() { None } else { Some(m.val.clone()) };
            let snap = DataSnapshot { reference: child_ref, value, previous: Some(m.prev.clone()), context: self.context.clone() };
            if !cb(snap) {
                break;
            }
        }
        Ok(())
    }
}

/// Filters, sort keys, skip/take, built from a `DataReference` (spec §4.7).
pub struct Query {
    reference: DataReference,
    options: QueryOptions,
    realtime_listeners: bool,
}

impl Query {
    pub fn new(reference: DataReference) -> Self {
        Query { reference, options: QueryOptions::default(), realtime_listeners: false }
    }

    /// Validates operator-specific argument shapes before storing the
    /// filter (spec §4.7: `in`/`!in` need a non-empty array, `between`/
    /// `!between` a 2-element array, `matches`/`!matches` a regex value).
    pub fn filter(mut self, key: impl Into<String>, op: QueryOperator, compare: Value) -> AceResult<Self> {
        match op {
            QueryOperator::In | QueryOperator::NotIn => match &compare {
                Value::Array(items) if !items.is_empty() => {}
                _ => return Err(AceError::PathRule { key: key.into(), reason: "in/!in requires a non-empty array" }),
            },
            QueryOperator::Between | QueryOperator::NotBetween => match &compare {
                Value::Array(items) if items.len() == 2 => {}
                _ => return Err(AceError::PathRule { key: key.into(), reason: "between/!between requires a 2-element array" }),
            },
            QueryOperator::Matches | QueryOperator::NotMatches => match &compare {
                Value::Regex { .. } => {}
                _ => return Err(AceError::PathRule { key: key.into(), reason: "matches/!matches requires a regexp value" }),
            },
            _ => {}
        }
        self.options.filters.push(QueryFilter { key: key.into(), op, compare });
        Ok(self)
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.options.skip = n;
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.options.take = Some(n);
        self
    }

    pub fn sort(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.options.order.push((key.into(), ascending));
        self
    }

    /// Registering a realtime listener opts the query into server-side
    /// monitoring; `stop()` terminates it.
    pub fn listen_realtime(mut self) -> Self {
        self.realtime_listeners = true;
        self
    }

    pub fn get(&self) -> AceResult<Vec<DataSnapshot>> {
        let result = self.reference.context.storage.query(&self.reference.path, &self.options)?;
        Ok(result.results.into_iter().map(|row| self.row_to_snapshot(row)).collect())
    }

    fn row_to_snapshot(&self, row: QueryRow) -> DataSnapshot {
        let reference = DataReference::at(Arc::clone(&self.reference.context), row.path);
        DataSnapshot { reference, value: row.value, previous: None, context: row.context }
    }

    pub fn get_references(&self) -> AceResult<Vec<DataReference>> {
        Ok(self.get()?.into_iter().map(|s| s.reference).collect())
    }

    pub fn stop(&self) {
        // Realtime monitoring is implemented by routing through `DataReference::on`
        // in the caller's own subscription; nothing owned here to tear down beyond
        // the listener flag.
    }

    /// Groups matching paths by parent and issues one `update(parent, {child:
    /// null, ...})` per parent. Returns the per-path outcome.
    pub fn remove(&self) -> AceResult<Vec<(String, AceResult<()>)>> {
        let rows = self.get()?;
        let mut by_parent: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for snap in &rows {
            let path = snap.reference.path();
            if let Some(parent) = path.parent() {
                by_parent.entry(parent.path()).or_default().push(path.key_string());
            }
        }
        let mut outcomes = Vec::new();
        for (parent_path, keys) in by_parent {
            let parent_ref = DataReference::at(Arc::clone(&self.reference.context), PathInfo::get(&parent_path).unwrap_or_else(|_| PathInfo::root()));
            let mut updates = BTreeMap::new();
            for key in &keys {
                updates.insert(key.clone(), Value::Null);
            }
            let outcome = parent_ref.update(Value::Object(updates));
            for key in keys {
                let per_path_outcome = match &outcome {
                    Ok(()) => Ok(()),
                    Err(e) => Err(e.clone()),
                };
                if let Err(e) = &per_path_outcome {
                    log::warn!("query remove failed for {parent_path}/{key}: {e}");
                }
                outcomes.push((format!("{parent_path}/{key}"), per_path_outcome));
            }
        }
        Ok(outcomes)
    }
}
