//! The observable shim used by `proxy`/`DataReference::observe` (spec
//! §4.8.5, option (d)): a single-producer, multi-subscriber primitive whose
//! producer starts on the first subscription and stops on the last
//! unsubscription.
//!
//! Spec options (a)-(c) (a pre-set instance, a host global, or a local
//! RxJS-like import) have no Rust equivalent — there is no ambient
//! reactive-library ecosystem convention in this corpus the way there is in
//! the JavaScript host, and no "global module registry" to fetch one from.
//! This crate exposes only its own `Observable<T>`; embedders wanting
//! interop with `futures::Stream` or similar wrap it themselves. See
//! DESIGN.md.

use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type StopProducer = Box<dyn FnOnce() + Send>;
type Producer<T> = Box<dyn Fn(Arc<dyn Fn(&T) + Send + Sync>) -> StopProducer + Send + Sync>;

/// Mutable subscriber bookkeeping, separate from `producer` so the producer
/// (which itself calls back into `broadcast`, re-locking this state) is
/// never invoked while this lock is held.
struct State<T> {
    subscribers: Vec<(u64, Listener<T>)>,
    stop_producer: Option<StopProducer>,
    next_id: u64,
}

pub struct Observable<T> {
    producer: Arc<Producer<T>>,
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable { producer: Arc::clone(&self.producer), state: Arc::clone(&self.state) }
    }
}

impl<T: Send + Sync + 'static> Observable<T> {
    /// `producer` is called with a broadcast function on the first
    /// subscription; it returns a stop callback invoked once the last
    /// subscriber leaves.
    pub fn new(producer: impl Fn(Arc<dyn Fn(&T) + Send + Sync>) -> StopProducer + Send + Sync + 'static) -> Self {
        Observable {
            producer: Arc::new(Box::new(producer)),
            state: Arc::new(Mutex::new(State { subscribers: Vec::new(), stop_producer: None, next_id: 0 })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ObservableSubscription<T> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, Arc::new(listener)));
        let is_first = state.subscribers.len() == 1;
        drop(state);

        // Called with the lock released: a real producer broadcasts its
        // initial value synchronously, which re-enters `broadcast` below and
        // re-locks `state`. Holding the lock across this call would deadlock.
        if is_first {
            let weak_state = Arc::clone(&self.state);
            let broadcast: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(move |value: &T| {
                let state = weak_state.lock().unwrap();
                for (_, cb) in &state.subscribers {
                    cb(value);
                }
            });
            let stop = (self.producer)(broadcast);
            self.state.lock().unwrap().stop_producer = Some(stop);
        }
        ObservableSubscription { id, state: Arc::clone(&self.state) }
    }
}

pub struct ObservableSubscription<T> {
    id: u64,
    state: Arc<Mutex<State<T>>>,
}

impl<T> ObservableSubscription<T> {
    pub fn unsubscribe(self) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(id, _)| *id != self.id);
        if state.subscribers.is_empty() {
            if let Some(stop) = state.stop_producer.take() {
                stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn producer_starts_once_and_stops_on_last_unsubscribe() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let starts2 = Arc::clone(&starts);
        let stops2 = Arc::clone(&stops);
        let observable: Observable<i32> = Observable::new(move |broadcast| {
            starts2.fetch_add(1, Ordering::SeqCst);
            broadcast(&1);
            let stops3 = Arc::clone(&stops2);
            Box::new(move || {
                stops3.fetch_add(1, Ordering::SeqCst);
            })
        });

        let received = Arc::new(Mutex::new(Vec::new()));
        let r2 = Arc::clone(&received);
        let sub1 = observable.subscribe(move |v| r2.lock().unwrap().push(*v));
        let sub2 = observable.subscribe(|_| {});
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(*received.lock().unwrap(), vec![1]);

        sub1.unsubscribe();
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        sub2.unsubscribe();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
