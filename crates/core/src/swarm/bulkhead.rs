//! # Bulkhead Fan-out
//!
//! Runs one task per unit, all spawned up front, with a shared
//! [`Semaphore`] bounding how many execute at once. Each task acquires
//! its permit itself, so excess units wait on the semaphore rather than
//! in a separate queue.
//!
//! Results come back paired with the unit that produced them, in input
//! order, regardless of completion order. A unit that panics, times out
//! or is cancelled yields a [`UnitFailure`] in its own slot and never
//! disturbs its siblings.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agents::UnitOutcome;

/// Scheduling rules for one fan-out
#[derive(Debug, Clone, Copy)]
pub struct BulkheadPolicy {
    /// Maximum units executing at once
    pub limit: usize,
    /// Per-unit wall-clock budget, counted from permit acquisition
    pub unit_timeout: Option<Duration>,
    /// Abort remaining units once one reports a fatal failure
    pub cancel_on_fatal: bool,
}

impl BulkheadPolicy {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            unit_timeout: None,
            cancel_on_fatal: false,
        }
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_cancel_on_fatal(mut self, cancel: bool) -> Self {
        self.cancel_on_fatal = cancel;
        self
    }
}

/// Why a unit produced no outcome of its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFailure {
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitFailure::Panicked(msg) => write!(f, "Task panicked: {}", msg),
            UnitFailure::TimedOut(limit) => write!(f, "Timed out after {}s", limit.as_secs()),
            UnitFailure::Cancelled => f.write_str("Cancelled after fatal error in a sibling task"),
        }
    }
}

/// A unit with whatever it ended with
pub type UnitReport<U, T> = (U, Result<UnitOutcome<T>, UnitFailure>);

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `run(unit)` for every unit under `policy`.
pub async fn run_bulkhead<U, T, F, Fut>(
    units: Vec<U>,
    policy: BulkheadPolicy,
    run: F,
) -> Vec<UnitReport<U, T>>
where
    U: Clone,
    T: Send + 'static,
    F: Fn(U) -> Fut,
    Fut: Future<Output = UnitOutcome<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(policy.limit.max(1)));
    let mut set = JoinSet::new();

    for (index, unit) in units.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let unit_future = run(unit);
        let unit_timeout = policy.unit_timeout;

        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, Err(UnitFailure::Cancelled)),
            };
            let guarded = AssertUnwindSafe(unit_future).catch_unwind();
            let caught = match unit_timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(caught) => caught,
                    Err(_) => return (index, Err(UnitFailure::TimedOut(limit))),
                },
                None => guarded.await,
            };
            (index, caught.map_err(|panic| UnitFailure::Panicked(panic_message(panic))))
        });
    }

    let mut slots: Vec<Option<Result<UnitOutcome<T>, UnitFailure>>> =
        units.iter().map(|_| None).collect();
    let mut aborted = false;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                let fatal = matches!(&outcome, Ok(o) if o.fatal);
                slots[index] = Some(outcome);
                if fatal && policy.cancel_on_fatal && !aborted {
                    tracing::warn!("Fatal unit failure, cancelling remaining units");
                    aborted = true;
                    set.abort_all();
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!("Bulkhead task failed: {}", e),
        }
    }

    units
        .into_iter()
        .zip(slots)
        .map(|(unit, slot)| {
            let outcome = slot.unwrap_or_else(|| {
                if aborted {
                    Err(UnitFailure::Cancelled)
                } else {
                    Err(UnitFailure::Panicked("task ended without a result".to_string()))
                }
            });
            (unit, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let reports = run_bulkhead((0..12).collect(), BulkheadPolicy::new(3), |n: u32| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                UnitOutcome::ok(n * 2)
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        let values: Vec<u32> = reports
            .into_iter()
            .map(|(_, r)| r.unwrap().result)
            .collect();
        assert_eq!(values, (0..12).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let reports = run_bulkhead(vec!["a", "b", "c"], BulkheadPolicy::new(2), |name| async move {
            if name == "b" {
                panic!("boom in {}", name);
            }
            UnitOutcome::ok(name.len())
        })
        .await;

        assert_eq!(reports[0].0, "a");
        assert!(reports[0].1.is_ok());
        assert_eq!(reports[1].0, "b");
        assert_eq!(
            reports[1].1.as_ref().unwrap_err(),
            &UnitFailure::Panicked("boom in b".to_string())
        );
        assert!(reports[2].1.is_ok());
    }

    #[tokio::test]
    async fn test_unit_timeout() {
        let policy = BulkheadPolicy::new(2).with_unit_timeout(Some(Duration::from_millis(20)));
        let reports = run_bulkhead(vec![1u64, 500], policy, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            UnitOutcome::ok(ms)
        })
        .await;

        assert!(reports[0].1.is_ok());
        assert!(matches!(reports[1].1, Err(UnitFailure::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_fatal_cancels_siblings_when_enabled() {
        let policy = BulkheadPolicy::new(1).with_cancel_on_fatal(true);
        let reports = run_bulkhead(vec![0u32, 1, 2, 3], policy, |n| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            UnitOutcome {
                result: n,
                fatal: true,
            }
        })
        .await;

        let cancelled = reports
            .iter()
            .filter(|(_, r)| matches!(r, Err(UnitFailure::Cancelled)))
            .count();
        assert_eq!(reports.len(), 4);
        assert!(cancelled >= 1);
        assert_eq!(
            UnitFailure::Cancelled.to_string(),
            "Cancelled after fatal error in a sibling task"
        );
    }

    #[tokio::test]
    async fn test_fatal_without_opt_in_runs_everything() {
        let reports = run_bulkhead(vec![0u32, 1, 2], BulkheadPolicy::new(1), |n| async move {
            UnitOutcome {
                result: n,
                fatal: true,
            }
        })
        .await;
        assert!(reports.iter().all(|(_, r)| r.is_ok()));
    }
}
