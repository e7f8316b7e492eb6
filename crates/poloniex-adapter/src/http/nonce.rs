/*
[INPUT]:  Wall clock (microseconds since UNIX epoch)
[OUTPUT]: Strictly increasing nonces for signed private requests
[POS]:    HTTP layer - replay protection shared by all signed commands
[UPDATE]: When changing nonce seeding or monotonicity rules
*/

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Lock-free source of strictly increasing nonces.
///
/// Values track wall-clock microseconds so a restarted process keeps
/// issuing nonces larger than the ones it sent before, and fall back to
/// `last + 1` whenever the clock stalls or steps backwards.
#[derive(Debug)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    /// Create a source seeded from the current time
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Create a source whose first value is strictly greater than `floor`
    pub fn starting_after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Next nonce; never less than or equal to any value returned before
    pub fn next(&self) -> u64 {
        let now = now_micros();
        let advance = |last: u64| last.saturating_add(1).max(now);
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last)))
        {
            Ok(previous) | Err(previous) => advance(previous),
        }
    }

    /// Most recently issued nonce (or the seed floor if none issued yet)
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new()
    }
}

fn now_micros() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}
