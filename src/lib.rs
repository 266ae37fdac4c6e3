//! Shared client-side kernel of a hierarchical, Firebase-like realtime JSON
//! database: path algebra, the augmented value model and its dual wire
//! serializations, the storage API seam, the event pipeline, and the live
//! data proxy. Persistence, indexing, and the network transport are
//! out-of-scope collaborators implementing [`storage::StorageApi`].

mod ascii85;
pub mod error;
pub mod event_emitter;
pub mod event_stream;
pub mod id;
pub mod observable;
pub mod path;
pub mod proxy;
pub mod reference;
pub mod serializer;
pub mod storage;
pub mod type_mappings;
pub mod value;

pub use error::{AceError, AceResult};
pub use event_emitter::SimpleEventEmitter;
pub use event_stream::{EventPublisher, EventStream, Subscription};
pub use id::{IdGenerator, MonotonicIdGenerator};
pub use observable::{Observable, ObservableSubscription};
pub use path::{ChildSegment, ExtractedVariables, Key, PathInfo};
pub use proxy::{
    LiveDataProxy, OrderedCollectionProxy, ProxyEvent, ProxyOptions, ProxyTransaction, TransactionStatus,
};
pub use reference::{AceContext, DataReference, DataSnapshot, ForEachResult, MutationsDataSnapshot, Query, RefEvent};
pub use serializer::{deserialize, deserialize_v1, deserialize_v2, detect_version, serialize, serialize_v1, serialize_v2};
pub use storage::{
    CacheMode, Context, Cursor, GetOptions, GetResult, HistoryEntry, HistoryFilter, QueryFilter, QueryOperator,
    QueryOptions, QueryResult, QueryRow, RawMutationEvent, ReflectKind, ReflectRequest, ReflectResult, StorageApi,
    WriteResult,
};
pub use type_mappings::{TypeMapping, TypeMappingRef, TypeMappings};
pub use value::{
    clone_object, compare_order, compare_values, get_mutations, is_void, values_are_equal, CompareResult, Mutation,
    ObjectDifferences, PartialArray, PathReference, Value,
};

/// Opens a database-like context against `storage`: the entry point an
/// embedder calls once at startup before handing out [`DataReference`]s.
/// Mirrors the source's `AceBase` constructor, minus the out-of-scope
/// storage-driver selection (the caller already built `storage`).
pub fn open(
    storage: std::sync::Arc<dyn StorageApi>,
    id_generator: std::sync::Arc<dyn IdGenerator>,
) -> (std::sync::Arc<AceContext>, DataReference) {
    let context = AceContext::new(storage, std::sync::Arc::new(TypeMappings::new()), id_generator);
    context.mark_ready();
    let root = DataReference::root(std::sync::Arc::clone(&context));
    (context, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MemoryStorage {
        data: Mutex<Value>,
        subscribers: Mutex<HashMap<u64, (PathInfo, Box<dyn Fn(RawMutationEvent) + Send + Sync>)>>,
        next_sub_id: AtomicU64,
    }

    impl MemoryStorage {
        fn new() -> Arc<Self> {
            Arc::new(MemoryStorage { data: Mutex::new(Value::Null), subscribers: Mutex::new(HashMap::new()), next_sub_id: AtomicU64::new(0) })
        }

        fn notify(&self, path: &PathInfo, new_value: Option<Value>, old_value: Option<Value>, context: Context) {
            let subs = self.subscribers.lock().unwrap();
            for (sub_path, handler) in subs.values() {
                if sub_path.is_on_trail_of(path) || path.is_on_trail_of(sub_path) {
                    handler(RawMutationEvent { path: path.clone(), new_value: new_value.clone(), old_value: old_value.clone(), context: context.clone() });
                }
            }
        }

        fn read(&self, path: &PathInfo) -> Option<Value> {
            let data = self.data.lock().unwrap();
            let mut cur = &*data;
            for key in path.keys() {
                match (key, cur) {
                    (Key::Str(k), Value::Object(obj)) => match obj.get(k) {
                        Some(v) => cur = v,
                        None => return None,
                    },
                    _ => return None,
                }
            }
            Some(cur.clone())
        }
    }

    impl StorageApi for MemoryStorage {
        fn get(&self, path: &PathInfo, _options: &GetOptions) -> AceResult<GetResult> {
            Ok(GetResult { value: self.read(path), context: Context::new(), cursor: None })
        }

        fn set(&self, path: &PathInfo, value: Value, context: Context) -> AceResult<WriteResult> {
            let old = self.read(path);
            {
                let mut data = self.data.lock().unwrap();
                write_path(&mut data, path.keys(), value.clone());
            }
            self.notify(path, Some(value), old, context);
            Ok(WriteResult { cursor: Some("c".to_string()) })
        }

        fn update(&self, path: &PathInfo, updates: BTreeMap<String, Value>, context: Context) -> AceResult<WriteResult> {
            for (k, v) in updates {
                let child = path.child(k.as_str())?;
                self.set(&child, v, context.clone())?;
            }
            Ok(WriteResult { cursor: Some("c".to_string()) })
        }

        fn transaction(&self, path: &PathInfo, f: &mut dyn FnMut(Option<Value>) -> AceResult<Option<Value>>, context: Context) -> AceResult<WriteResult> {
            let current = self.read(path);
            if let Some(new_value) = f(current)? {
                return self.set(path, new_value, context);
            }
            Ok(WriteResult { cursor: None })
        }

        fn exists(&self, path: &PathInfo) -> AceResult<bool> {
            Ok(self.read(path).is_some())
        }

        fn reflect(&self, path: &PathInfo, request: ReflectRequest) -> AceResult<ReflectResult> {
            let value = self.read(path);
            let keys: Vec<String> = match (&value, request.kind) {
                (Some(Value::Object(obj)), ReflectKind::Children | ReflectKind::Info) => obj.keys().cloned().collect(),
                _ => Vec::new(),
            };
            let start = request.skip.min(keys.len());
            let end = if request.limit == 0 { keys.len() } else { (start + request.limit).min(keys.len()) };
            Ok(ReflectResult { list: keys[start..end].to_vec(), more: end < keys.len() })
        }

        fn query(&self, _path: &PathInfo, _options: &QueryOptions) -> AceResult<QueryResult> {
            Ok(QueryResult { results: Vec::new(), context: Context::new() })
        }

        fn count(&self, path: &PathInfo, _options: &QueryOptions) -> AceResult<usize> {
            Ok(match self.read(path) {
                Some(Value::Object(obj)) => obj.len(),
                _ => 0,
            })
        }

        fn export(&self, path: &PathInfo, writer: &mut dyn std::io::Write) -> AceResult<()> {
            let value = self.read(path).unwrap_or(Value::Null);
            let json = serializer::serialize(&value, 2);
            writer.write_all(json.to_string().as_bytes()).map_err(|e| AceError::SerializerFormat { reason: e.to_string() })
        }

        fn import(&self, path: &PathInfo, reader: &mut dyn std::io::Read) -> AceResult<()> {
            let mut buf = String::new();
            reader.read_to_string(&mut buf).map_err(|e| AceError::SerializerFormat { reason: e.to_string() })?;
            let json: serde_json::Value = serde_json::from_str(&buf).map_err(|e| AceError::SerializerFormat { reason: e.to_string() })?;
            let value = serializer::deserialize(&json)?;
            self.set(path, value, Context::new())?;
            Ok(())
        }

        fn get_mutations(&self, _filter: &HistoryFilter) -> AceResult<Vec<HistoryEntry>> {
            Ok(Vec::new())
        }

        fn get_changes(&self, _filter: &HistoryFilter) -> AceResult<Vec<HistoryEntry>> {
            Ok(Vec::new())
        }

        fn subscribe(&self, path: &PathInfo, _event: &str, handler: Box<dyn Fn(RawMutationEvent) + Send + Sync>) -> AceResult<u64> {
            let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
            self.subscribers.lock().unwrap().insert(id, (path.clone(), handler));
            Ok(id)
        }

        fn unsubscribe(&self, subscription_id: u64) -> AceResult<()> {
            self.subscribers.lock().unwrap().remove(&subscription_id);
            Ok(())
        }
    }

    fn write_path(root: &mut Value, keys: &[Key], value: Value) {
        if keys.is_empty() {
            *root = value;
            return;
        }
        let (head, rest) = (&keys[0], &keys[1..]);
        if !matches!(root, Value::Object(_)) {
            *root = Value::Object(BTreeMap::new());
        }
        let Value::Object(obj) = root else { unreachable!() };
        let Key::Str(k) = head else { unreachable!("fixture only uses string keys") };
        let entry = obj.entry(k.clone()).or_insert(Value::Object(BTreeMap::new()));
        if rest.is_empty() {
            *entry = value;
        } else {
            write_path(entry, rest, value);
        }
    }

    #[test]
    fn open_and_round_trip_a_value_through_set_and_get() {
        let (_context, root) = open(MemoryStorage::new(), Arc::new(MonotonicIdGenerator::new()));
        let users = root.child("users/ewout").unwrap();
        users.set(Value::from(serde_json::json!({"name": "Ewout"}))).unwrap();
        let snap = users.get(GetOptions::default()).unwrap();
        assert_eq!(snap.val().and_then(Value::as_object).and_then(|o| o.get("name")), Some(&Value::Str("Ewout".into())));
    }

    #[test]
    fn export_then_import_round_trips_through_the_wire_format() {
        let (_context, root) = open(MemoryStorage::new(), Arc::new(MonotonicIdGenerator::new()));
        let doc = root.child("doc").unwrap();
        doc.set(Value::from(serde_json::json!({"a": 1, "b": {"c": 2}}))).unwrap();
        let mut buf = Vec::new();
        doc.export(&mut buf).unwrap();

        let (_context2, root2) = open(MemoryStorage::new(), Arc::new(MonotonicIdGenerator::new()));
        let doc2 = root2.child("doc").unwrap();
        doc2.import(&mut &buf[..]).unwrap();
        let snap = doc2.get(GetOptions::default()).unwrap();
        assert!(values_are_equal(snap.val().unwrap(), &Value::from(serde_json::json!({"a": 1, "b": {"c": 2}}))));
    }

    #[test]
    fn a_live_data_proxy_tracks_changes_made_through_the_reference_directly() {
        let (_context, root) = open(MemoryStorage::new(), Arc::new(MonotonicIdGenerator::new()));
        let chat = root.child("chat").unwrap();
        chat.set(Value::from(serde_json::json!({"messages": {}}))).unwrap();

        let proxy = chat.proxy(ProxyOptions::default()).unwrap();
        chat.child("messages/msg1").unwrap().set(Value::from(serde_json::json!({"text": "hi"}))).unwrap();

        assert_eq!(proxy.get("messages/msg1/text").unwrap(), Value::Str("hi".into()));
    }
}
