//! Debounce policy for the write queue's epilogue.
//!
//! After every queued operation the queue may run a shared finalize action
//! (persisting the provider's manifest). Running it after literally every
//! item would hammer the backend during bursts, so the policy enforces a
//! minimum delay between runs - with the guarantee that once the queue
//! drains, a skipped epilogue is run exactly once more, so pending state
//! always reaches the backend.

/// Decides when the write queue's epilogue is due.
///
/// Pure bookkeeping over caller-supplied clocks; mirror-engine feeds it
/// `now_ms` and executes the epilogue when told to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpiloguePolicy {
    delay_ms: u64,
    last_run_ms: Option<u64>,
    skipped_since_last: bool,
}

impl EpiloguePolicy {
    /// Create a policy with the given minimum delay between runs.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            last_run_ms: None,
            skipped_since_last: false,
        }
    }

    /// Called after each completed operation. Returns whether to run the
    /// epilogue now; the first item after construction always runs it.
    pub fn after_item(&mut self, now_ms: u64) -> bool {
        let due = match self.last_run_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.delay_ms,
        };
        if due {
            self.last_run_ms = Some(now_ms);
            self.skipped_since_last = false;
        } else {
            self.skipped_since_last = true;
        }
        due
    }

    /// Called when the queue empties. Returns whether a trailing run is
    /// owed because the last `after_item` decision skipped.
    pub fn on_drain(&mut self, now_ms: u64) -> bool {
        if self.skipped_since_last {
            self.last_run_ms = Some(now_ms);
            self.skipped_since_last = false;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_item_always_runs() {
        let mut policy = EpiloguePolicy::new(1_000);
        assert!(policy.after_item(0));
    }

    #[test]
    fn items_within_delay_are_skipped() {
        let mut policy = EpiloguePolicy::new(1_000);
        assert!(policy.after_item(0));
        assert!(!policy.after_item(100));
        assert!(!policy.after_item(999));
        assert!(policy.after_item(1_000));
    }

    #[test]
    fn drain_runs_once_when_last_decision_skipped() {
        let mut policy = EpiloguePolicy::new(1_000);
        assert!(policy.after_item(0));
        assert!(!policy.after_item(100));

        assert!(policy.on_drain(150));
        // Nothing further owed.
        assert!(!policy.on_drain(200));
    }

    #[test]
    fn drain_owes_nothing_when_last_item_ran() {
        let mut policy = EpiloguePolicy::new(1_000);
        assert!(policy.after_item(0));
        assert!(!policy.on_drain(50));
    }

    #[test]
    fn burst_run_count_is_bounded() {
        // N items inside one delay window: at most ceil(elapsed/delay)+1
        // runs, plus the trailing drain run.
        let mut policy = EpiloguePolicy::new(1_000);
        let mut runs = 0;
        for i in 0..50 {
            if policy.after_item(i * 10) {
                runs += 1;
            }
        }
        // 50 items over 490ms: the first runs, the rest are within delay.
        assert_eq!(runs, 1);
        assert!(policy.on_drain(500));
    }

    #[test]
    fn zero_delay_runs_every_item() {
        let mut policy = EpiloguePolicy::new(0);
        assert!(policy.after_item(5));
        assert!(policy.after_item(5));
        assert!(!policy.on_drain(5));
    }
}
