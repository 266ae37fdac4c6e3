//! `SimpleEventEmitter` (spec §4.5): a conventional `on`/`off`/`once`/`emit`
//! emitter, plus `emit_once` latching used to sequence database readiness
//! and similar one-time signals.
//!
//! Grounded on the `{listeners, latched?}`-per-event-name state machine
//! described in `spec.md` §9's design notes, shaped like
//! `pl3xus_sync::registry`'s `ComponentChangeEvent`/`ComponentRemovedEvent`
//! plain-data-event pattern but in-process rather than wire-level.

use crate::error::{AceError, AceResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Listener<T> = Box<dyn Fn(&T) + Send + Sync>;

struct ListenerEntry<T> {
    callback: Listener<T>,
    /// If set, this entry is dropped after the listener is invoked by the
    /// next `emit` it sees (it still fires exactly once, same as `on`).
    once: bool,
}

struct EventState<T> {
    listeners: Vec<ListenerEntry<T>>,
    /// Set once `emit_once` has fired for this event name.
    latched: Option<Arc<T>>,
}

impl<T> Default for EventState<T> {
    fn default() -> Self {
        EventState { listeners: Vec::new(), latched: None }
    }
}

/// An emitter keyed by event name, where `T` is the event payload type
/// (commonly an enum if different events carry different shapes, or a
/// single payload type if the emitter only ever sequences one kind of
/// signal).
pub struct SimpleEventEmitter<T> {
    events: Mutex<HashMap<String, EventState<T>>>,
}

impl<T> Default for SimpleEventEmitter<T> {
    fn default() -> Self {
        SimpleEventEmitter { events: Mutex::new(HashMap::new()) }
    }
}

impl<T: 'static> SimpleEventEmitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. If the event has already latched via
    /// `emit_once`, the listener is invoked synchronously with the stored
    /// value instead of being queued.
    pub fn on(&self, event: impl Into<String>, listener: impl Fn(&T) + Send + Sync + 'static) {
        let event = event.into();
        let mut events = self.events.lock().unwrap();
        let state = events.entry(event).or_default();
        if let Some(value) = &state.latched {
            listener(value);
            return;
        }
        state.listeners.push(ListenerEntry { callback: Box::new(listener), once: false });
    }

    /// Registers a listener that is automatically removed after its first
    /// invocation (or invoked immediately, without being stored, if the
    /// event has already latched). `emit` sweeps fired once-listeners out
    /// after running them, in the same locked section that ran them, so
    /// there is no window where a duplicate `emit` could invoke one twice.
    pub fn once(&self, event: impl Into<String>, listener: impl Fn(&T) + Send + Sync + 'static) {
        let event = event.into();
        let mut events = self.events.lock().unwrap();
        let state = events.entry(event).or_default();
        if let Some(value) = &state.latched {
            listener(value);
            return;
        }
        state.listeners.push(ListenerEntry { callback: Box::new(listener), once: true });
    }

    /// Removes every listener for `event`.
    pub fn off(&self, event: &str) {
        self.events.lock().unwrap().remove(event);
    }

    /// Emits a value to every current listener for `event`. Exceptions
    /// (panics) in a listener are not caught here in release builds the way
    /// a dynamic host would swallow a thrown exception; embedders are
    /// expected to keep listener bodies panic-free. Returns an error if the
    /// event has already latched via `emit_once`.
    pub fn emit(&self, event: &str, value: T) -> AceResult<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(state) = events.get_mut(event) {
            if state.latched.is_some() {
                log::error!("emit on already-latched event {event}");
                return Err(AceError::EventAlreadyOnce { event: event.to_string() });
            }
            for entry in &state.listeners {
                (entry.callback)(&value);
            }
            state.listeners.retain(|entry| !entry.once);
        }
        Ok(())
    }

    /// Emits a value, then latches it: every listener is invoked once now,
    /// all listeners are removed, and every subsequent `on`/`once` call for
    /// this event is invoked synchronously with the stored value instead of
    /// being queued. A second `emit`/`emit_once` on an already-latched event
    /// raises `EventAlreadyOnce`.
    pub fn emit_once(&self, event: impl Into<String>, value: T) -> AceResult<()>
    where
        T: Clone,
    {
        let event = event.into();
        let mut events = self.events.lock().unwrap();
        let state = events.entry(event.clone()).or_default();
        if state.latched.is_some() {
            return Err(AceError::EventAlreadyOnce { event });
        }
        for entry in &state.listeners {
            (entry.callback)(&value);
        }
        state.listeners.clear();
        state.latched = Some(Arc::new(value));
        Ok(())
    }

    pub fn has_latched(&self, event: &str) -> bool {
        self.events.lock().unwrap().get(event).is_some_and(|s| s.latched.is_some())
    }
}
