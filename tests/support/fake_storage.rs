//! In-memory `StorageApi` fixture shared by the integration tests, mirroring
//! how `pl3xus_websockets`'s integration tests stand up an in-process
//! transport instead of a live socket.

use acebase_core::{
    AceError, AceResult, Context, GetOptions, GetResult, HistoryEntry, HistoryFilter, Key, PathInfo,
    QueryOptions, QueryResult, RawMutationEvent, ReflectRequest, ReflectResult, StorageApi, Value, WriteResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub struct FakeStorage {
    data: Mutex<Value>,
    subscribers: Mutex<HashMap<u64, (PathInfo, Box<dyn Fn(RawMutationEvent) + Send + Sync>)>>,
    next_sub_id: AtomicU64,
}

impl FakeStorage {
    pub fn new(initial: Value) -> Arc<Self> {
        Arc::new(FakeStorage { data: Mutex::new(initial), subscribers: Mutex::new(HashMap::new()), next_sub_id: AtomicU64::new(0) })
    }

    fn notify(&self, path: &PathInfo, new_value: Option<Value>, old_value: Option<Value>, context: Context) {
        let subs = self.subscribers.lock().unwrap();
        for (sub_path, handler) in subs.values() {
            if sub_path.is_on_trail_of(path) || path.is_on_trail_of(sub_path) {
                handler(RawMutationEvent { path: path.clone(), new_value: new_value.clone(), old_value: old_value.clone(), context: context.clone() });
            }
        }
    }
}

impl StorageApi for FakeStorage {
    fn get(&self, path: &PathInfo, _options: &GetOptions) -> AceResult<GetResult> {
        let data = self.data.lock().unwrap();
        let mut cur = &*data;
        for key in path.keys() {
            match (key, cur) {
                (Key::Str(k), Value::Object(obj)) => match obj.get(k) {
                    Some(v) => cur = v,
                    None => return Ok(GetResult { value: None, context: Context::new(), cursor: None }),
                },
                _ => return Ok(GetResult { value: None, context: Context::new(), cursor: None }),
            }
        }
        Ok(GetResult { value: Some(cur.clone()), context: Context::new(), cursor: None })
    }

    fn set(&self, path: &PathInfo, value: Value, context: Context) -> AceResult<WriteResult> {
        let old = self.get(path, &GetOptions::default())?.value;
        {
            let mut data = self.data.lock().unwrap();
            write_path(&mut data, path.keys(), value.clone());
        }
        self.notify(path, Some(value), old, context);
        Ok(WriteResult { cursor: Some("c1".to_string()) })
    }

    fn update(&self, path: &PathInfo, updates: BTreeMap<String, Value>, context: Context) -> AceResult<WriteResult> {
        for (k, v) in updates {
            let child = path.child(k.as_str())?;
            self.set(&child, v, context.clone())?;
        }
        Ok(WriteResult { cursor: Some("c2".to_string()) })
    }

    fn transaction(&self, path: &PathInfo, f: &mut dyn FnMut(Option<Value>) -> AceResult<Option<Value>>, context: Context) -> AceResult<WriteResult> {
        let current = self.get(path, &GetOptions::default())?.value;
        if let Some(new_value) = f(current)? {
            self.set(path, new_value, context)?;
        }
        Ok(WriteResult { cursor: None })
    }

    fn exists(&self, path: &PathInfo) -> AceResult<bool> {
        Ok(self.get(path, &GetOptions::default())?.value.is_some())
    }

    fn reflect(&self, _path: &PathInfo, _request: ReflectRequest) -> AceResult<ReflectResult> {
        Ok(ReflectResult { list: Vec::new(), more: false })
    }

    fn query(&self, _path: &PathInfo, _options: &QueryOptions) -> AceResult<QueryResult> {
        Ok(QueryResult { results: Vec::new(), context: Context::new() })
    }

    fn count(&self, _path: &PathInfo, _options: &QueryOptions) -> AceResult<usize> {
        Ok(0)
    }

    fn export(&self, path: &PathInfo, writer: &mut dyn std::io::Write) -> AceResult<()> {
        let value = self.get(path, &GetOptions::default())?.value.unwrap_or(Value::Null);
        let json = acebase_core::serialize(&value, 2);
        writer.write_all(json.to_string().as_bytes()).map_err(|e| AceError::SerializerFormat { reason: e.to_string() })
    }

    fn import(&self, path: &PathInfo, reader: &mut dyn std::io::Read) -> AceResult<()> {
        let mut buf = String::new();
        reader.read_to_string(&mut buf).map_err(|e| AceError::SerializerFormat { reason: e.to_string() })?;
        let json: serde_json::Value = serde_json::from_str(&buf).map_err(|e| AceError::SerializerFormat { reason: e.to_string() })?;
        let value = acebase_core::deserialize(&json)?;
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
