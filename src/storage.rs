//! The abstract storage API the kernel calls against (spec §6). This is the
//! out-of-scope collaborator boundary: persistence, indexing, query
//! execution, and transaction logs are implemented by whoever provides a
//! `StorageApi`, not by this crate.
//!
//! Modeled as synchronous trait methods rather than `async fn` in a trait
//! object: the kernel's own concurrency model (§5) is single-threaded
//! cooperative with explicit suspension points, and a `dyn StorageApi`
//! needs object safety, which native async-fn-in-trait does not have
//! without boxing futures. Async embedders bridge with their own runtime
//! (block_on, a channel, etc.) on the far side of this trait — see
//! DESIGN.md for this open-question resolution.

use crate::error::AceResult;
use crate::path::PathInfo;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// Arbitrary user-supplied data attached to every write and threaded back
/// out of the corresponding event. The kernel stamps proxy-originated writes
/// with a `ProxyOrigin` entry and reads `acebase_cursor` back out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    fields: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Stamps this context with the originating proxy's id and the write
    /// kind (`"set"` or `"update"`), per spec §4.8.1 step 6.
    pub fn with_proxy_origin(self, proxy_id: u64, source: &str) -> Self {
        let mut obj = BTreeMap::new();
        obj.insert("id".to_string(), Value::Int(proxy_id as i64));
        obj.insert("source".to_string(), Value::Str(source.to_string()));
        self.with("acebase_proxy", Value::Object(obj))
    }

    /// The proxy id this context was stamped with, if any.
    pub fn proxy_origin_id(&self) -> Option<i64> {
        match self.get("acebase_proxy") {
            Some(Value::Object(obj)) => match obj.get("id") {
                Some(Value::Int(id)) => Some(*id),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn cursor(&self) -> Option<String> {
        match self.get("acebase_cursor") {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

pub type Cursor = Option<String>;

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub child_objects: bool,
    pub cache_mode: CacheMode,
    pub cursor: Cursor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    Allow,
    Bypass,
    Only,
}

pub struct GetResult {
    pub value: Option<Value>,
    pub context: Context,
    pub cursor: Cursor,
}

pub struct WriteResult {
    pub cursor: Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectKind {
    Children,
    Info,
}

pub struct ReflectRequest {
    pub kind: ReflectKind,
    pub limit: usize,
    pub skip: usize,
}

pub struct ReflectResult {
    pub list: Vec<String>,
    pub more: bool,
}

#[derive(Debug, Clone)]
pub enum QueryOperator {
    Lt,
    Lte,
    Eq,
    Ne,
    Gt,
    Gte,
    Exists,
    NotExists,
    Between,
    NotBetween,
    Like,
    NotLike,
    Matches,
    NotMatches,
    In,
    NotIn,
    Has,
    NotHas,
    Contains,
    NotContains,
    FulltextContains,
    FulltextNotContains,
    GeoNearby,
}

#[derive(Debug, Clone)]
pub struct QueryFilter {
    pub key: String,
    pub op: QueryOperator,
    pub compare: Value,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Vec<QueryFilter>,
    pub skip: usize,
    pub take: Option<usize>,
    pub order: Vec<(String, bool)>,
}

pub struct QueryRow {
    pub path: PathInfo,
    pub value: Option<Value>,
    pub context: Context,
}

pub struct QueryResult {
    pub results: Vec<QueryRow>,
    pub context: Context,
}

/// Raw, un-mapped mutation event delivered by storage subscriptions: the
/// kernel translates these into user-visible snapshots (spec §4.7.1).
pub struct RawMutationEvent {
    pub path: PathInfo,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
    pub context: Context,
}

/// A single historical entry returned by `get_mutations`/`get_changes`.
pub struct HistoryEntry {
    pub path: PathInfo,
    pub mutation: crate::value::Mutation,
    pub context: Context,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub path: String,
    pub cursor: Option<String>,
    pub timestamp: Option<i64>,
}

/// The storage surface the kernel calls against. Every method may block the
/// caller (the embedder decides how); the kernel never assumes a particular
/// scheduling model beyond "operations complete in the order issued on a
/// single reference" (spec §5).
pub trait StorageApi: Send + Sync {
    fn get(&self, path: &PathInfo, options: &GetOptions) -> AceResult<GetResult>;
    fn set(&self, path: &PathInfo, value: Value, context: Context) -> AceResult<WriteResult>;
    fn update(&self, path: &PathInfo, updates: BTreeMap<String, Value>, context: Context) -> AceResult<WriteResult>;
    fn transaction(
        &self,
        path: &PathInfo,
        f: &mut dyn FnMut(Option<Value>) -> AceResult<Option<Value>>,
        context: Context,
    ) -> AceResult<WriteResult>;
    fn exists(&self, path: &PathInfo) -> AceResult<bool>;
    fn reflect(&self, path: &PathInfo, request: ReflectRequest) -> AceResult<ReflectResult>;
    fn query(&self, path: &PathInfo, options: &QueryOptions) -> AceResult<QueryResult>;

    /// Number of children matching `options` without loading their values.
    fn count(&self, path: &PathInfo, options: &QueryOptions) -> AceResult<usize>;
    fn export(&self, path: &PathInfo, writer: &mut dyn Write) -> AceResult<()>;
    fn import(&self, path: &PathInfo, reader: &mut dyn Read) -> AceResult<()>;
    fn get_mutations(&self, filter: &HistoryFilter) -> AceResult<Vec<HistoryEntry>>;
    fn get_changes(&self, filter: &HistoryFilter) -> AceResult<Vec<HistoryEntry>>;

    /// Subscribes `handler` to raw mutation events at `path` for `event`
    /// (e.g. `"value"`, `"mutations"`, ...). Returns a subscription id the
    /// caller later passes to `unsubscribe`.
    fn subscribe(
        &self,
        path: &PathInfo,
        event: &str,
        handler: Box<dyn Fn(RawMutationEvent) + Send + Sync>,
    ) -> AceResult<u64>;

    fn unsubscribe(&self, subscription_id: u64) -> AceResult<()>;
}

impl fmt::Debug for dyn StorageApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<dyn StorageApi>")
    }
}
