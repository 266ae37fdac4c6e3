//! Unique id generation (spec §1, §6): out of scope as a *specified*
//! algorithm ("the kernel only requires a function producing unique,
//! lexicographically time-ordered identifiers") — the CUID-style generator
//! referenced there is an external collaborator. This module only provides
//! the trait seam plus a default implementation so `DataReference::push` is
//! usable standalone; any `IdGenerator` may be substituted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait IdGenerator: Send + Sync {
    /// Produces a new id, unique within this process and lexicographically
    /// sortable by creation time at millisecond resolution.
    fn next_id(&self) -> String;
}

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn encode_base36_fixed(mut n: u64, width: usize) -> String {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8(digits).unwrap()
}

/// Timestamp (ms) + per-millisecond monotonic counter, both fixed-width
/// base36 encoded so lexicographic and chronological order coincide.
pub struct MonotonicIdGenerator {
    counter: AtomicU64,
}

impl Default for MonotonicIdGenerator {
    fn default() -> Self {
        MonotonicIdGenerator { counter: AtomicU64::new(0) }
    }
}

impl MonotonicIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for MonotonicIdGenerator {
    fn next_id(&self) -> String {
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        // 9 base36 digits covers timestamps through the year ~2262; 4 more
        // for the per-process sequence counter, ample for single-tick bursts.
        format!("{}{}", encode_base36_fixed(now_ms, 9), encode_base36_fixed(seq % 36u64.pow(4), 4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic_for_same_timestamp() {
        let gen = MonotonicIdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
