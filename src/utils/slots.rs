//! Per-strategy running-job accounting
//!
//! The check against `max_concurrent_jobs` and the increment happen under one
//! lock, so two concurrent triggers can never both take the last slot.

use crate::error::DrError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct JobSlots {
    running: Arc<Mutex<HashMap<String, usize>>>,
}

impl JobSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a running slot for `strategy`, or fail without side effects
    pub fn try_acquire(&self, strategy: &str, max: usize) -> Result<RunningSlot, DrError> {
        let mut running = self.running.lock();
        let count = running.entry(strategy.to_string()).or_insert(0);
        if *count >= max {
            return Err(DrError::ConcurrencyLimitExceeded {
                strategy: strategy.to_string(),
                running: *count,
                max,
            });
        }
        *count += 1;
        Ok(RunningSlot {
            strategy: strategy.to_string(),
            running: self.running.clone(),
        })
    }

    pub fn running(&self, strategy: &str) -> usize {
        self.running.lock().get(strategy).copied().unwrap_or(0)
    }
}

/// Releases its slot when dropped
#[derive(Debug)]
pub struct RunningSlot {
    strategy: String,
    running: Arc<Mutex<HashMap<String, usize>>>,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        let mut running = self.running.lock();
        if let Some(count) = running.get_mut(&self.strategy) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(&self.strategy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_limit_and_release() {
        let slots = JobSlots::new();
        let first = slots.try_acquire("daily", 2).unwrap();
        let _second = slots.try_acquire("daily", 2).unwrap();

        let err = slots.try_acquire("daily", 2).unwrap_err();
        assert!(matches!(err, DrError::ConcurrencyLimitExceeded { running: 2, max: 2, .. }));

        drop(first);
        assert_eq!(slots.running("daily"), 1);
        assert!(slots.try_acquire("daily", 2).is_ok());
    }

    #[test]
    fn test_slots_are_per_strategy() {
        let slots = JobSlots::new();
        let _a = slots.try_acquire("a", 1).unwrap();
        assert!(slots.try_acquire("b", 1).is_ok());
        assert!(slots.try_acquire("a", 1).is_err());
    }
}
