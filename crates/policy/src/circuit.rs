use std::collections::HashMap;

use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks consecutive policy-block events per session. Once a session
/// accumulates `threshold` consecutive blocks without an intervening
/// allow, the breaker trips and the caller should abort the turn rather
/// than let the model keep retrying denied tool calls.
pub struct CircuitBreaker {
    threshold: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, counts: Mutex::new(HashMap::new()) }
    }

    /// Record a policy block for `session_id`. Returns `true` if the
    /// breaker has now tripped (count reached `threshold`).
    pub fn record_block(&self, session_id: &str) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(session_id.to_string()).or_insert(0);
        *count += 1;
        *count >= self.threshold
    }

    /// Record a policy allow, resetting the consecutive-block count.
    pub fn record_allow(&self, session_id: &str) {
        self.counts.lock().remove(session_id);
    }

    pub fn is_tripped(&self, session_id: &str) -> bool {
        self.counts.lock().get(session_id).is_some_and(|c| *c >= self.threshold)
    }

    pub fn clear(&self, session_id: &str) {
        self.counts.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_consecutive_blocks() {
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.record_block("s1"));
        assert!(!breaker.record_block("s1"));
        assert!(breaker.record_block("s1"));
        assert!(breaker.is_tripped("s1"));
    }

    #[test]
    fn allow_resets_the_count() {
        let breaker = CircuitBreaker::new(2);
        assert!(!breaker.record_block("s1"));
        breaker.record_allow("s1");
        assert!(!breaker.record_block("s1"));
        assert!(!breaker.is_tripped("s1"));
    }

    #[test]
    fn sessions_are_tracked_independently() {
        let breaker = CircuitBreaker::new(1);
        assert!(breaker.record_block("s1"));
        assert!(!breaker.is_tripped("s2"));
    }
}
