//! Kernel error kinds (spec §7).
//!
//! These are error *kinds*, not a hierarchy of types: every fallible kernel
//! operation returns `Result<T, AceError>`. Variants carry the context a
//! caller needs to react (the offending key, a cancellation reason, the
//! unknown tag encountered, ...).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AceError {
    #[error("invalid key {key:?}: {reason}")]
    PathRule { key: String, reason: &'static str },

    #[error("operation not allowed on a wildcard or variable path: {path}")]
    WildcardNotAllowed { path: String },

    #[error("cannot store an undefined value at {path}")]
    UndefinedValue { path: String },

    #[error("cannot subscribe: stream is closed")]
    StreamClosed,

    #[error("subscription denied: {reason}")]
    SubscriptionCanceled { reason: String },

    #[error("proxy used after destroy()")]
    ProxyDestroyed,

    #[error("transaction conflict: {reason}")]
    TransactionConflict { reason: String },

    #[error("proxy type violation: {reason}")]
    ProxyTypeViolation { reason: String },

    #[error("serializer format error: {reason}")]
    SerializerFormat { reason: String },

    #[error("cyclic reference detected while cloning a value")]
    CyclicReference,

    #[error("cannot clone a DataSnapshot; clone its underlying value instead")]
    InvalidClone,

    #[error("invalid type mapping for {path}: {reason}")]
    InvalidMapping { path: String, reason: String },

    #[error("event {event:?} already fired as a one-time (`emitOnce`) event")]
    EventAlreadyOnce { event: String },

    /// Raised by `MutationsDataSnapshot::previous()` — a mutation-list
    /// snapshot has no single "previous value"; callers must iterate
    /// individual mutation snapshots instead (spec §4.7).
    #[error("a MutationsDataSnapshot has no single previous value; use for_each to inspect individual mutations")]
    UseIndividualPrev,
}

pub type AceResult<T> = Result<T, AceError>;
