//! Augmented JSON value model, structural equality, and diff (spec §4.2,
//! §3).
//!
//! Object children are kept in a `BTreeMap`, i.e. key order is lexicographic
//! rather than insertion order. JSON does not define object key order as
//! meaningful, and this matches the deep-comparison model `estuary-flow`'s
//! `json::node::compare` assumes (sorted-field iteration via
//! `itertools::zip_longest`) — see DESIGN.md for this open-question
//! resolution.

use crate::error::{AceError, AceResult};
use crate::path::Key;
use itertools::{EitherOrBoth, Itertools};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// An opaque cross-path reference, distinguished from a plain string so the
/// serializer round-trips it losslessly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathReference(pub String);

impl PathReference {
    pub fn new(path: impl Into<String>) -> Self {
        PathReference(path.into())
    }
}

/// A sparse-array view: an integer-keyed map with array semantics, tagged so
/// the serializer preserves intent even when most indices are missing.
pub type PartialArray = BTreeMap<usize, Value>;

/// Augmented JSON: the only value shapes the serializer and diff engine
/// accept (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Arbitrary-precision integer, kept as its canonical decimal string
    /// representation (no native Rust integer type is wide enough, and the
    /// wire form is decimal text anyway).
    BigInt(String),
    /// Milliseconds since the Unix epoch, UTC.
    Date(i64),
    Bytes(Vec<u8>),
    Regex { pattern: String, flags: String },
    Reference(PathReference),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    PartialArray(PartialArray),
}

impl Value {
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// An `Option<&Value>` is void if absent or if present-and-null; `null` and
/// "missing" are treated symmetrically per spec §4.2.
pub fn is_void(v: Option<&Value>) -> bool {
    match v {
        None => true,
        Some(value) => value.is_void(),
    }
}

/// Converts plain `serde_json::Value` into the augmented model, for test
/// fixtures and embedders migrating from plain JSON. Never produces
/// `BigInt`/`Date`/`Bytes`/`Regex`/`Reference`/`PartialArray` — those only
/// arise from deserializing the kernel's own wire form.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Structural equality over augmented JSON (spec §4.2): scalars by strict
/// equality, dates by epoch ms, path references by path string, binary
/// buffers by byte contents, arrays elementwise, objects by identical key
/// set and pairwise-equal values.
pub fn values_are_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Regex { pattern: p1, flags: f1 }, Value::Regex { pattern: p2, flags: f2 }) => p1 == p2 && f1 == f2,
        (Value::Reference(x), Value::Reference(y)) => x.0 == y.0,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_are_equal(a, b))
        }
        (Value::PartialArray(x), Value::PartialArray(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|v2| values_are_equal(v, v2)))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|v2| values_are_equal(v, v2)))
        }
        _ => false,
    }
}

/// Deep copy over augmented JSON. Date/PathReference/Regex are immutable and
/// returned as-is (cloned, but conceptually identity-preserving). Cannot
/// fail in practice: `Value` is an owned tree with no shared back-references,
/// so the cycle this mirrors (spec's `CyclicReference`) is unreachable by
/// construction in Rust; the `Result` return and error variant are kept for
/// interface parity with the source behavior.
pub fn clone_object(value: &Value) -> AceResult<Value> {
    Ok(value.clone())
}

/// Outcome of comparing two (possibly void) values (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum CompareResult {
    Identical,
    Added,
    Removed,
    Changed,
    Differences(ObjectDifferences),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectDifferences {
    pub added: Vec<Key>,
    pub removed: Vec<Key>,
    pub changed: Vec<Key>,
}

pub fn compare_values(a: Option<&Value>, b: Option<&Value>, sorted_results: bool) -> CompareResult {
    if is_void(a) && is_void(b) {
        return CompareResult::Identical;
    }
    if is_void(a) {
        return CompareResult::Added;
    }
    if is_void(b) {
        return CompareResult::Removed;
    }
    let (a, b) = (a.unwrap(), b.unwrap());

    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            let mut diffs = ObjectDifferences::default();
            let mut keys: Vec<&String> = x.keys().chain(y.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let av = x.get(key);
                let bv = y.get(key);
                if is_void(av) && is_void(bv) {
                    continue;
                }
                match compare_values(av, bv, sorted_results) {
                    CompareResult::Identical => {}
                    CompareResult::Added => diffs.added.push(Key::Str(key.clone())),
                    CompareResult::Removed => diffs.removed.push(Key::Str(key.clone())),
                    _ => diffs.changed.push(Key::Str(key.clone())),
                }
            }
            if sorted_results {
                diffs.changed.sort();
            }
            if diffs.added.is_empty() && diffs.removed.is_empty() && diffs.changed.is_empty() {
                CompareResult::Identical
            } else {
                CompareResult::Differences(diffs)
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            let mut diffs = ObjectDifferences::default();
            for (i, pair) in x.iter().zip_longest(y.iter()).enumerate() {
                match pair {
                    EitherOrBoth::Both(av, bv) => match compare_values(Some(av), Some(bv), sorted_results) {
                        CompareResult::Identical => {}
                        _ => diffs.changed.push(Key::Index(i)),
                    },
                    EitherOrBoth::Left(_) => diffs.removed.push(Key::Index(i)),
                    EitherOrBoth::Right(_) => diffs.added.push(Key::Index(i)),
                }
            }
            if sorted_results {
                diffs.changed.sort();
            }
            if diffs.added.is_empty() && diffs.removed.is_empty() && diffs.changed.is_empty() {
                CompareResult::Identical
            } else {
                CompareResult::Differences(diffs)
            }
        }
        _ if values_are_equal(a, b) => CompareResult::Identical,
        _ => CompareResult::Changed,
    }
}

/// A relative write: `target` is the key path relative to the two values
/// passed to `get_mutations`. `val == Value::Null` denotes deletion;
/// `prev == Value::Null` denotes addition.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub target: Vec<Key>,
    pub prev: Value,
    pub val: Value,
}

/// Flattens `compare_values` into a minimal mutation list. Descends into
/// objects in key order, arrays element by element.
pub fn get_mutations(a: &Value, b: &Value, sorted_results: bool) -> Vec<Mutation> {
    let mut out = Vec::new();
    collect_mutations(Some(a), Some(b), &mut Vec::new(), sorted_results, &mut out);
    out
}

fn collect_mutations(
    a: Option<&Value>,
    b: Option<&Value>,
    trail: &mut Vec<Key>,
    sorted_results: bool,
    out: &mut Vec<Mutation>,
) {
    match compare_values(a, b, sorted_results) {
        CompareResult::Identical => {}
        CompareResult::Added => out.push(Mutation {
            target: trail.clone(),
            prev: Value::Null,
            val: b.cloned_or_null(),
        }),
        CompareResult::Removed => out.push(Mutation {
            target: trail.clone(),
            prev: a.cloned_or_null(),
            val: Value::Null,
        }),
        CompareResult::Changed => out.push(Mutation {
            target: trail.clone(),
            prev: a.cloned_or_null(),
            val: b.cloned_or_null(),
        }),
        CompareResult::Differences(diffs) => {
            let (a, b) = (a.unwrap(), b.unwrap());
            // Each bucket is individually in key order (built from a single
            // sorted key pass in `compare_values`), but concatenating them
            // would visit e.g. all additions before any change at an earlier
            // key. Merge back into one key-ordered sequence.
            let mut keys: Vec<Key> = diffs.added.into_iter().chain(diffs.removed).chain(diffs.changed).collect();
            keys.sort();
            for key in keys {
                trail.push(key.clone());
                let (av, bv) = match &key {
                    Key::Str(k) => (a.as_object().and_then(|m| m.get(k)), b.as_object().and_then(|m| m.get(k))),
                    Key::Index(i) => (
                        a.as_array().and_then(|arr| arr.get(*i)),
                        b.as_array().and_then(|arr| arr.get(*i)),
                    ),
                };
                collect_mutations(av, bv, trail, sorted_results, out);
                trail.pop();
            }
        }
    }
}

trait ClonedOrNull {
    fn cloned_or_null(&self) -> Value;
}

impl ClonedOrNull for Option<&Value> {
    fn cloned_or_null(&self) -> Value {
        match self {
            Some(v) => (*v).clone(),
            None => Value::Null,
        }
    }
}

/// An arbitrary, total ordering over values, stable across shapes; used only
/// where a deterministic order is needed (e.g. `Query` sort keys), not part
/// of equality. Grounded on `estuary-flow::json::node::compare`'s
/// cross-type ordering table.
pub fn compare_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) | Value::BigInt(_) | Value::Date(_) => 2,
            Value::Str(_) | Value::Regex { .. } | Value::Reference(_) => 3,
            Value::Bytes(_) => 4,
            Value::Array(_) | Value::PartialArray(_) => 5,
            Value::Object(_) => 6,
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip_longest(y.iter())
            .map(|eob| match eob {
                EitherOrBoth::Both(a, b) => compare_order(a, b),
                EitherOrBoth::Left(_) => Ordering::Greater,
                EitherOrBoth::Right(_) => Ordering::Less,
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal),
        _ => rank(a).cmp(&rank(b)),
    }
}
