//! Monotonic child keys for appended records.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;

/// Generates child keys that sort strictly increasing, as strings, for one
/// writer.
///
/// A key is the millisecond timestamp followed by a per-millisecond
/// counter, both zero padded. If the clock goes backwards the last
/// timestamp is reused and the counter keeps increasing.
#[derive(Debug, Default)]
pub struct PushKeyGenerator {
    last: Mutex<(i64, u32)>,
}

impl PushKeyGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next key.
    pub fn next_key(&self) -> String {
        self.next_key_at(Utc::now().timestamp_millis())
    }

    fn next_key_at(&self, now_ms: i64) -> String {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let (millis, counter) = *last;
        *last = if now_ms > millis {
            (now_ms, 0)
        } else if counter == u32::MAX {
            (millis + 1, 0)
        } else {
            (millis, counter + 1)
        };
        let (millis, counter) = *last;
        format!("{millis:013}{counter:010}")
    }
}
