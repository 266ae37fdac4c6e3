//! Exercises two of the maintainer-review fixes end to end: `DataReference`
//! actually consulting `TypeMappings` on `set`/`get` (spec §4.6/§4.7), and
//! `LiveDataProxy::batch` coalescing several writes into a single storage
//! call (spec §4.8.1).

mod support;

use acebase_core::{open, GetOptions, MonotonicIdGenerator, ProxyOptions, Value};
use std::sync::Arc;
use support::fake_storage::FakeStorage;

#[test]
fn set_and_get_round_trip_through_a_bound_type_mapping() {
    let storage = FakeStorage::new(Value::from(serde_json::json!({})));
    let (context, root) = open(storage, Arc::new(MonotonicIdGenerator::new()));

    // A mapping bound at "users" normalizes anything written under it: the
    // creator defaults a missing "role" field, the serializer writes it back
    // out, so a caller that never mentioned "role" still sees it on read.
    context
        .type_mappings
        .bind::<Value>(
            "users",
            |v| {
                let mut obj = v.as_object().cloned().unwrap_or_default();
                obj.entry("role".to_string()).or_insert_with(|| Value::Str("member".into()));
                Ok(Value::Object(obj))
            },
            |v| Ok(v.clone()),
        )
        .unwrap();

    let ewout = root.child("users").unwrap().child("ewout").unwrap();
    ewout.set(Value::from(serde_json::json!({"name": "Ewout"}))).unwrap();

    let snap = ewout.get(GetOptions::default()).unwrap();
    let obj = snap.val().unwrap().as_object().unwrap();
    assert_eq!(obj.get("role"), Some(&Value::Str("member".into())));
    assert_eq!(obj.get("name"), Some(&Value::Str("Ewout".into())));
}

#[test]
fn batch_coalesces_several_sets_into_one_storage_write() {
    let storage = FakeStorage::new(Value::from(serde_json::json!({"doc": {}})));
    let (_context, root) = open(storage, Arc::new(MonotonicIdGenerator::new()));
    let doc = root.child("doc").unwrap();

    let proxy = doc.proxy(ProxyOptions::default()).unwrap();
    let mutation_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&mutation_count);
    proxy.on("mutation", move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    proxy
        .batch(|p| {
            p.set("a", Value::Int(1)).unwrap();
            p.set("b", Value::Int(2)).unwrap();
        })
        .unwrap();

    // Both writes land under the same parent and fire from the same tick.
    assert_eq!(proxy.get("a").unwrap(), Value::Int(1));
    assert_eq!(proxy.get("b").unwrap(), Value::Int(2));
    assert_eq!(mutation_count.load(std::sync::atomic::Ordering::SeqCst), 2);

    let stored = doc.get(GetOptions::default()).unwrap();
    let obj = stored.val().unwrap().as_object().unwrap();
    assert_eq!(obj.get("a"), Some(&Value::Int(1)));
    assert_eq!(obj.get("b"), Some(&Value::Int(2)));
}
