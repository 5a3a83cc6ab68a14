//! Per-tick work budget.
//!
//! The budget is the only backpressure valve of the engine. Long running
//! steps poll [`FrameBudget::is_busy`] between units of work and return
//! early once it reports `true`; the remaining work resumes next tick.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// How much work a single tick may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    /// Never busy unless the host forces it.
    Unlimited,
    /// Busy once this much wall time has passed since [`FrameBudget::begin_tick`].
    Time(Duration),
    /// Busy after this many polls of [`FrameBudget::is_busy`] in one tick.
    ///
    /// Each poll counts as one unit of work, which makes tick slicing
    /// deterministic in tests.
    Polls(u32),
}

/// Tracks consumption of the current tick's budget.
///
/// Interior mutability lets every step share one budget by `&` reference
/// while the engine runs on a single thread.
#[derive(Debug)]
pub struct FrameBudget {
    limit: BudgetLimit,
    tick_start: Cell<Instant>,
    polls: Cell<u32>,
    forced_busy: Cell<bool>,
    ticks: Cell<u64>,
}

impl FrameBudget {
    pub fn new(limit: BudgetLimit) -> Self {
        Self {
            limit,
            tick_start: Cell::new(Instant::now()),
            polls: Cell::new(0),
            forced_busy: Cell::new(false),
            ticks: Cell::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(BudgetLimit::Unlimited)
    }

    /// Budget derived from a millisecond setting, `0` meaning unlimited.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::unlimited()
        } else {
            Self::new(BudgetLimit::Time(Duration::from_millis(ms)))
        }
    }

    /// Reset consumption at the start of a tick.
    pub fn begin_tick(&self) {
        self.tick_start.set(Instant::now());
        self.polls.set(0);
        self.ticks.set(self.ticks.get() + 1);
    }

    /// Whether the remainder of this tick's work should be deferred.
    pub fn is_busy(&self) -> bool {
        if self.forced_busy.get() {
            return true;
        }
        match self.limit {
            BudgetLimit::Unlimited => false,
            BudgetLimit::Time(limit) => self.tick_start.get().elapsed() >= limit,
            BudgetLimit::Polls(max) => {
                let polls = self.polls.get() + 1;
                self.polls.set(polls);
                polls > max
            }
        }
    }

    /// Host override for the "time budget exceeded" signal.
    pub fn set_busy(&self, busy: bool) {
        self.forced_busy.set(busy);
    }

    pub fn limit(&self) -> BudgetLimit {
        self.limit
    }

    /// Number of ticks begun so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.get()
    }

    /// Wall time spent in the current tick.
    pub fn elapsed(&self) -> Duration {
        self.tick_start.get().elapsed()
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unlimited_is_never_busy() {
        let budget = FrameBudget::unlimited();
        budget.begin_tick();
        for _ in 0..1000 {
            assert!(!budget.is_busy());
        }
    }

    #[test]
    fn test_poll_limit_resets_each_tick() {
        let budget = FrameBudget::new(BudgetLimit::Polls(2));
        budget.begin_tick();
        assert!(!budget.is_busy());
        assert!(!budget.is_busy());
        assert!(budget.is_busy());

        budget.begin_tick();
        assert!(!budget.is_busy());
        assert_eq!(budget.tick_count(), 2);
    }

    #[test]
    fn test_time_limit() {
        let budget = FrameBudget::new(BudgetLimit::Time(Duration::from_millis(5)));
        budget.begin_tick();
        assert!(!budget.is_busy());
        thread::sleep(Duration::from_millis(10));
        assert!(budget.is_busy());
    }

    #[test]
    fn test_forced_busy_overrides_limit() {
        let budget = FrameBudget::unlimited();
        budget.begin_tick();
        budget.set_busy(true);
        assert!(budget.is_busy());
        budget.set_busy(false);
        assert!(!budget.is_busy());
    }

    #[test]
    fn test_from_millis_zero_is_unlimited() {
        assert_eq!(FrameBudget::from_millis(0).limit(), BudgetLimit::Unlimited);
        assert_eq!(
            FrameBudget::from_millis(16).limit(),
            BudgetLimit::Time(Duration::from_millis(16))
        );
    }
}
