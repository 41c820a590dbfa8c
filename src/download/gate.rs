//! Lowerable concurrency ceiling shared by every page task of a site.
//!
//! A task is admitted only while `active < ceiling`, checked again after the
//! increment, so a task admitted after [`ConcurrencyGate::lower_ceiling`]
//! returns never runs above the new ceiling. Tasks already running when the
//! ceiling drops finish normally.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::debug;

/// Shared, atomically lowerable admission gate.
#[derive(Debug)]
pub struct ConcurrencyGate {
    ceiling: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    notify: Notify,
}

/// RAII admission; dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<ConcurrencyGate>,
}

impl ConcurrencyGate {
    /// Creates a gate admitting up to `ceiling` tasks (at least one).
    #[must_use]
    pub fn new(ceiling: usize) -> Arc<Self> {
        Arc::new(Self {
            ceiling: AtomicUsize::new(ceiling.max(1)),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    /// Current ceiling.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// Tasks currently admitted.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest concurrent admission count seen since creation or the last lowering.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Lowers the ceiling to `ceiling` (never raises it). Returns the ceiling in effect.
    pub fn lower_ceiling(&self, ceiling: usize) -> usize {
        let target = ceiling.max(1);
        let previous = self.ceiling.fetch_min(target, Ordering::SeqCst);
        if target < previous {
            self.peak.store(0, Ordering::SeqCst);
            debug!(from = previous, to = target, "concurrency ceiling lowered");
            target
        } else {
            previous
        }
    }

    /// Admits the caller if a slot is free right now.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= self.ceiling() {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    let permit = GatePermit {
                        gate: Arc::clone(self),
                    };
                    // The ceiling may have dropped between the check and the increment.
                    if current + 1 > self.ceiling() {
                        drop(permit);
                        return None;
                    }
                    self.peak.fetch_max(current + 1, Ordering::SeqCst);
                    return Some(permit);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> GatePermit {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
        self.gate.notify.notify_waiters();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_admits_up_to_ceiling() {
        let gate = ConcurrencyGate::new(2);
        let a = gate.try_acquire().unwrap();
        let _b = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.active(), 2);
        assert_eq!(gate.peak(), 2);
        drop(a);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_zero_ceiling_is_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.ceiling(), 1);
    }

    #[test]
    fn test_lower_ceiling_never_raises() {
        let gate = ConcurrencyGate::new(8);
        assert_eq!(gate.lower_ceiling(2), 2);
        assert_eq!(gate.lower_ceiling(6), 2);
        assert_eq!(gate.ceiling(), 2);
    }

    #[test]
    fn test_lowering_blocks_new_admissions_while_over_ceiling() {
        let gate = ConcurrencyGate::new(4);
        let permits: Vec<_> = (0..4).map(|_| gate.try_acquire().unwrap()).collect();
        gate.lower_ceiling(2);
        assert_eq!(gate.peak(), 0);

        let mut permits = permits;
        permits.pop();
        // 3 still active, ceiling 2
        assert!(gate.try_acquire().is_none());
        permits.pop();
        permits.pop();
        // 1 active
        let _p = gate.try_acquire().unwrap();
        assert_eq!(gate.peak(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.try_acquire().unwrap();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_tasks_never_exceed_ceiling() {
        let gate = ConcurrencyGate::new(3);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                assert!(gate.active() <= 3);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(gate.peak() <= 3);
        assert_eq!(gate.active(), 0);
    }
}
