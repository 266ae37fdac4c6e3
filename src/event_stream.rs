//! `EventStream`, `EventPublisher`, and `Subscription` (spec §4.4): a small
//! observable primitive with lazy activation, per-subscriber activation
//! callbacks, and producer-driven cancellation.
//!
//! Grounded on the subscriber-bookkeeping shape of
//! `pl3xus_sync::registry::SubscriptionManager` (an owned list of
//! subscription entries, added/removed by id) generalized from
//! connection-keyed network subscriptions to a single in-process observable.

use crate::error::{AceError, AceResult};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Activation {
    NotStarted,
    Active,
    Canceled(String),
    Stopped,
}

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;
type ActivationCallback = Box<dyn Fn(Result<(), String>) + Send + Sync>;
type UnsubscribedCallback = Box<dyn Fn() + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    callback: Callback<T>,
    activation_callback: Option<ActivationCallback>,
}

struct Inner<T> {
    activation: Activation,
    subscribers: Vec<Subscriber<T>>,
    on_all_unsubscribed: Option<UnsubscribedCallback>,
    next_id: u64,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Inner { activation: Activation::NotStarted, subscribers: Vec::new(), on_all_unsubscribed: None, next_id: 0 }
    }
}

/// Handle passed to a stream's init function, letting the producer publish
/// values, activate the stream, or cancel it.
pub struct EventPublisher<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for EventPublisher<T> {
    fn clone(&self) -> Self {
        EventPublisher { inner: Arc::clone(&self.inner) }
    }
}

impl<T> EventPublisher<T> {
    /// Publishes a value to every current subscriber. Returns whether there
    /// were any subscribers to receive it.
    pub fn publish(&self, value: T) -> bool {
        let inner = self.inner.lock().unwrap();
        for sub in &inner.subscribers {
            (sub.callback)(&value);
        }
        !inner.subscribers.is_empty()
    }

    /// Activates the stream. `on_all_unsubscribed` is invoked once, the
    /// first time the subscriber count drops back to zero after having been
    /// active.
    pub fn start(&self, on_all_unsubscribed: impl Fn() + Send + Sync + 'static) {
        let mut inner = self.inner.lock().unwrap();
        if inner.activation != Activation::NotStarted {
            return;
        }
        inner.activation = Activation::Active;
        inner.on_all_unsubscribed = Some(Box::new(on_all_unsubscribed));
        for sub in &inner.subscribers {
            if let Some(cb) = &sub.activation_callback {
                cb(Ok(()));
            }
        }
    }

    /// Cancels the stream with a reason. Existing subscribers are notified
    /// through their activation callback; new subscribers are rejected with
    /// the same reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        let reason = reason.into();
        log::error!("event stream canceled: {reason}");
        inner.activation = Activation::Canceled(reason.clone());
        for sub in inner.subscribers.drain(..) {
            if let Some(cb) = sub.activation_callback {
                cb(Err(reason.clone()));
            }
        }
    }
}

/// An observable stream of `T`, built from a producer init function.
pub struct EventStream<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        EventStream { inner: Arc::clone(&self.inner) }
    }
}

impl<T: 'static> EventStream<T> {
    /// Constructs a stream, invoking `init` synchronously with a publisher
    /// handle the producer retains to call `publish`/`start`/`cancel` later
    /// (e.g. once an underlying subscription has been accepted).
    pub fn new(init: impl FnOnce(EventPublisher<T>)) -> Self {
        let inner = Arc::new(Mutex::new(Inner::new()));
        let publisher = EventPublisher { inner: Arc::clone(&inner) };
        init(publisher);
        EventStream { inner }
    }

    /// Subscribes a callback, with an optional activation callback invoked
    /// once the stream becomes active (or immediately, with the cached
    /// activation, if it already is).
    pub fn subscribe(
        &self,
        callback: impl Fn(&T) + Send + Sync + 'static,
        activation_callback: Option<Box<dyn Fn(Result<(), String>) + Send + Sync>>,
    ) -> AceResult<Subscription<T>> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.activation {
            Activation::Canceled(reason) => return Err(AceError::SubscriptionCanceled { reason: reason.clone() }),
            Activation::Stopped => return Err(AceError::StreamClosed),
            Activation::NotStarted | Activation::Active => {}
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let is_active = inner.activation == Activation::Active;
        inner.subscribers.push(Subscriber { id, callback: Box::new(callback), activation_callback });
        if is_active {
            if let Some(cb) = &inner.subscribers.last().unwrap().activation_callback {
                cb(Ok(()));
            }
        }
        Ok(Subscription { id, inner: Arc::clone(&self.inner) })
    }

    /// Removes every subscriber, invoking `on_all_unsubscribed` if the
    /// stream was active.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        let was_active = inner.activation == Activation::Active;
        inner.subscribers.clear();
        inner.activation = Activation::Stopped;
        if was_active {
            if let Some(cb) = inner.on_all_unsubscribed.take() {
                cb();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

static SUBSCRIPTION_ID_SOURCE: AtomicU64 = AtomicU64::new(0);

/// A handle returned by `subscribe`; dropping it does not unsubscribe —
/// callers must call `stop()` explicitly (Rust has no finalizer-driven
/// unsubscribe equivalent to the source's garbage-collected callback
/// objects).
pub struct Subscription<T> {
    id: u64,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Subscription<T> {
    /// Removes exactly this subscriber. If it was the last one and the
    /// stream was active, invokes the publisher's `on_all_unsubscribed`
    /// callback.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| s.id != self.id);
        if inner.subscribers.is_empty() && inner.activation == Activation::Active {
            inner.activation = Activation::Stopped;
            if let Some(cb) = inner.on_all_unsubscribed.take() {
                cb();
            }
        }
    }

    /// A process-unique identifier for this subscription, useful as a map
    /// key for embedders tracking many subscriptions (mirrors
    /// `pl3xus_sync::registry::SubscriptionManager` keying subscriptions by
    /// an opaque id rather than callback identity).
    pub fn opaque_id() -> u64 {
        SUBSCRIPTION_ID_SOURCE.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn late_subscriber_receives_cached_activation() {
        let stream: EventStream<i32> = EventStream::new(|publisher| {
            publisher.start(|| {});
        });
        let activated = Arc::new(AtomicUsize::new(0));
        let activated2 = Arc::clone(&activated);
        stream
            .subscribe(
                |_| {},
                Some(Box::new(move |result| {
                    if result.is_ok() {
                        activated2.fetch_add(1, AtomicOrdering::SeqCst);
                    }
                })),
            )
            .unwrap();
        assert_eq!(activated.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn stopped_stream_rejects_new_subscribers() {
        let stream: EventStream<i32> = EventStream::new(|_publisher| {});
        stream.stop();
        let err = stream.subscribe(|_| {}, None).unwrap_err();
        assert!(matches!(err, AceError::StreamClosed));
    }

    #[test]
    fn canceled_stream_rejects_with_reason() {
        let stream: EventStream<i32> = EventStream::new(|publisher| {
            publisher.cancel("access denied");
        });
        let err = stream.subscribe(|_| {}, None).unwrap_err();
        assert!(matches!(err, AceError::SubscriptionCanceled { reason } if reason == "access denied"));
    }

    #[test]
    fn subscription_stop_triggers_unsubscribed_once_last_leaves() {
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        let unsubscribed2 = Arc::clone(&unsubscribed);
        let stream: EventStream<i32> = EventStream::new(move |publisher| {
            publisher.start(move || {
                unsubscribed2.fetch_add(1, AtomicOrdering::SeqCst);
            });
        });
        let sub = stream.subscribe(|_| {}, None).unwrap();
        assert_eq!(stream.subscriber_count(), 1);
        sub.stop();
        assert_eq!(stream.subscriber_count(), 0);
        assert_eq!(unsubscribed.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn publish_reaches_current_subscribers_only() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let publisher_cell: Arc<Mutex<Option<EventPublisher<i32>>>> = Arc::new(Mutex::new(None));
        let publisher_cell2 = Arc::clone(&publisher_cell);
        let stream: EventStream<i32> = EventStream::new(move |publisher| {
            publisher.start(|| {});
            *publisher_cell2.lock().unwrap() = Some(publisher);
        });

        let r2 = Arc::clone(&received);
        stream.subscribe(move |v| r2.lock().unwrap().push(*v), None).unwrap();

        let publisher = publisher_cell.lock().unwrap().clone().unwrap();
        let had_subscribers = publisher.publish(42);
        assert!(had_subscribers);
        assert_eq!(*received.lock().unwrap(), vec![42]);
    }
}
