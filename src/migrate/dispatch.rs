//! Bounded dispatcher
//!
//! Admits work items into concurrent tokio tasks, never more than the
//! configured maximum at once. A slot is claimed by awaiting a semaphore permit
//! and released when the task's [`Slot`] guard drops, so a failing or panicking
//! task still frees it. [`Dispatcher::run`] drains every launched task before
//! returning.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

/// Counters shared by every task of one dispatch
#[derive(Debug, Default)]
pub struct DispatchState {
    max: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    launched: AtomicUsize,
    completed: AtomicUsize,
}

impl DispatchState {
    fn new(max: usize) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    /// Configured cap; 0 means unbounded
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// A claimed unit of dispatch concurrency
///
/// The in-flight gauge is decremented before the permit itself is returned.
pub struct Slot {
    state: Arc<DispatchState>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Slot {
    fn claim(state: Arc<DispatchState>, permit: Option<OwnedSemaphorePermit>) -> Self {
        let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(current, Ordering::SeqCst);
        state.launched.fetch_add(1, Ordering::SeqCst);
        Self {
            state,
            _permit: permit,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Results of one [`Dispatcher::run`]
#[derive(Debug)]
pub struct DispatchSummary<T> {
    /// Values returned by tasks that ran to completion, in completion order
    pub outcomes: Vec<T>,

    /// Tasks that panicked or were cancelled
    pub panicked: usize,
}

impl<T> DispatchSummary<T> {
    fn new() -> Self {
        Self {
            outcomes: Vec::new(),
            panicked: 0,
        }
    }

    fn collect(&mut self, joined: std::result::Result<T, JoinError>) {
        match joined {
            Ok(value) => self.outcomes.push(value),
            Err(e) => {
                error!(error = %e, "transfer task did not complete");
                self.panicked += 1;
            }
        }
    }
}

/// Runs work items with at most `max` in flight
pub struct Dispatcher {
    limit: Option<Arc<Semaphore>>,
    state: Arc<DispatchState>,
}

impl Dispatcher {
    /// Create a dispatcher; `max == 0` disables the cap
    pub fn new(max: usize) -> Self {
        let limit = match max {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS)))),
        };

        Self {
            limit,
            state: Arc::new(DispatchState::new(max)),
        }
    }

    pub fn state(&self) -> Arc<DispatchState> {
        self.state.clone()
    }

    /// Wait for a free slot
    async fn admit(&self) -> Option<Slot> {
        let permit = match &self.limit {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return None,
            },
            None => None,
        };
        Some(Slot::claim(self.state.clone(), permit))
    }

    /// Launch `work` for each item in production order and wait for all of them
    ///
    /// Admission blocks while every slot is taken. Finished tasks are reaped as
    /// admission proceeds; the remainder are awaited before returning.
    pub async fn run<I, F, Fut, T>(&self, items: I, work: F) -> DispatchSummary<T>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();
        let mut summary = DispatchSummary::new();

        for item in items {
            let Some(slot) = self.admit().await else {
                error!("dispatch semaphore closed, no further items admitted");
                break;
            };
            debug!(
                in_flight = self.state.in_flight(),
                max = self.state.max(),
                "slot admitted"
            );

            let task = work(item);
            tasks.spawn(async move {
                let _slot = slot;
                task.await
            });

            while let Some(joined) = tasks.try_join_next() {
                summary.collect(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            summary.collect(joined);
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_test_logging;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_max() {
        init_test_logging();
        let dispatcher = Dispatcher::new(3);
        let state = dispatcher.state();

        let summary = dispatcher
            .run(0..20u64, |i| {
                let state = state.clone();
                async move {
                    assert!(state.in_flight() <= 3);
                    tokio::time::sleep(Duration::from_millis(5 + i % 4)).await;
                    i
                }
            })
            .await;

        assert_eq!(summary.outcomes.len(), 20);
        assert_eq!(summary.panicked, 0);
        assert!(state.peak() <= 3);
        assert!(state.peak() >= 1);
    }

    #[tokio::test]
    async fn test_barrier_waits_for_all_tasks() {
        init_test_logging();
        let dispatcher = Dispatcher::new(2);
        let state = dispatcher.state();

        let summary = dispatcher
            .run(0..6u64, |i| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                i * 2
            })
            .await;

        assert_eq!(state.launched(), 6);
        assert_eq!(state.completed(), 6);
        assert_eq!(state.in_flight(), 0);

        let mut values = summary.outcomes;
        values.sort_unstable();
        assert_eq!(values, vec![0, 2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        init_test_logging();
        let dispatcher = Dispatcher::new(1);
        let state = dispatcher.state();

        let summary = dispatcher
            .run(0..3u32, |i| async move {
                if i == 0 {
                    panic!("boom");
                }
                i
            })
            .await;

        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(state.completed(), 3);
        assert_eq!(state.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_max_is_unbounded() {
        let dispatcher = Dispatcher::new(0);
        let state = dispatcher.state();
        let gate = Arc::new(tokio::sync::Barrier::new(8));

        let summary = dispatcher
            .run(0..8usize, |i| {
                let gate = gate.clone();
                async move {
                    gate.wait().await;
                    i
                }
            })
            .await;

        assert_eq!(summary.outcomes.len(), 8);
        assert_eq!(state.peak(), 8);
        assert_eq!(state.max(), 0);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let dispatcher = Dispatcher::new(4);
        let summary = dispatcher.run(Vec::<u8>::new(), |i| async move { i }).await;
        assert!(summary.outcomes.is_empty());
        assert_eq!(dispatcher.state().launched(), 0);
    }
}
