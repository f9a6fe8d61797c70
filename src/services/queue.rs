// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Paced request queue.
//!
//! One in-flight slot per endpoint class. Waiters on a slot are served in
//! FIFO order (tokio's mutex is fair), and consecutive calls of a class are
//! spaced by the class's pacing delay. A queue-wide semaphore optionally
//! bounds parallelism across classes.
//!
//! Before a task runs the breaker is consulted; a tripped breaker rejects the
//! task with `AuthFailure` and a blocked one with `Blocked`.

use crate::config::{EndpointClass, PacingProfile};
use crate::error::{Result, SyncError};
use crate::services::breaker::Breaker;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Snapshot of queue activity for status display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queue_length: usize,
    pub processing: usize,
    pub total_requests: u64,
}

/// Per-class slot; holds the instant the last call of the class finished.
type ClassSlot = Mutex<Option<Instant>>;

pub struct RequestQueue {
    slots: HashMap<EndpointClass, Arc<ClassSlot>>,
    parallel: Option<Arc<Semaphore>>,
    pacing: PacingProfile,
    breaker: Arc<Breaker>,
    queued: AtomicUsize,
    processing: AtomicUsize,
    total: AtomicU64,
    stats_tx: watch::Sender<QueueStats>,
}

/// Decrements a counter when dropped, so cancelled waiters are accounted for.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestQueue {
    /// `max_parallel` bounds concurrent requests across classes. Zero, or a
    /// value at or above the number of classes, adds no bound.
    pub fn new(pacing: PacingProfile, max_parallel: usize, breaker: Arc<Breaker>) -> Self {
        let slots = EndpointClass::ALL
            .iter()
            .map(|class| (*class, Arc::new(Mutex::new(None))))
            .collect();
        let parallel = (max_parallel > 0 && max_parallel < EndpointClass::ALL.len())
            .then(|| Arc::new(Semaphore::new(max_parallel)));
        let (stats_tx, _) = watch::channel(QueueStats::default());

        Self {
            slots,
            parallel,
            pacing,
            breaker,
            queued: AtomicUsize::new(0),
            processing: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            stats_tx,
        }
    }

    /// Run `task` once the class slot is free and the pacing delay has passed.
    ///
    /// Cancelling `cancel` drops a queued task before it runs, or aborts a
    /// running one; either way the caller gets `Cancelled`.
    pub async fn enqueue<T, F, Fut>(
        &self,
        class: EndpointClass,
        cancel: &CancellationToken,
        task: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self
            .slots
            .get(&class)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("no queue slot for {}", class.as_str())))?;

        let waiting = CountGuard::enter(&self.queued);

        let mut last_finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            guard = slot.lock() => guard,
        };

        if let Some(finished) = *last_finished {
            let ready_at = finished + self.pacing.delay_for(class);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        let _permit = match &self.parallel {
            Some(semaphore) => Some(tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|_| SyncError::Config("request queue closed".to_string()))?,
            }),
            None => None,
        };

        if self.breaker.is_blocked() {
            tracing::debug!(class = class.as_str(), "Queue rejecting task: blocked");
            return Err(SyncError::Blocked);
        }
        if self.breaker.has_failed() {
            tracing::debug!(class = class.as_str(), "Queue rejecting task: breaker tripped");
            return Err(SyncError::AuthFailure);
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        drop(waiting);
        let _running = CountGuard::enter(&self.processing);
        self.total.fetch_add(1, Ordering::SeqCst);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = task() => result,
        };

        *last_finished = Some(Instant::now());
        result
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queue_length: self.queued.load(Ordering::SeqCst),
            processing: self.processing.load(Ordering::SeqCst),
            total_requests: self.total.load(Ordering::SeqCst),
        }
    }

    /// Receiver updated by the stats publisher.
    pub fn subscribe_stats(&self) -> watch::Receiver<QueueStats> {
        self.stats_tx.subscribe()
    }

    pub fn publish_stats(&self) {
        let stats = self.stats();
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }

    /// Publish stats every `period` until `cancel` fires.
    pub fn spawn_stats_publisher(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => queue.publish_stats(),
                }
            }
            tracing::debug!("Queue stats publisher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemorySessionStorage;
    use std::sync::Mutex as StdMutex;

    fn queue_with(pacing: PacingProfile) -> (Arc<RequestQueue>, Arc<Breaker>) {
        let breaker = Arc::new(Breaker::new(Arc::new(MemorySessionStorage::new())));
        (
            Arc::new(RequestQueue::new(pacing, 4, breaker.clone())),
            breaker,
        )
    }

    #[tokio::test]
    async fn test_same_class_runs_fifo() {
        let (queue, _) = queue_with(PacingProfile::none());
        let order = Arc::new(StdMutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = queue.clone();
            let order = order.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(EndpointClass::Events, &cancel, || async move {
                        order.lock().unwrap().push(i);
                        tokio::task::yield_now().await;
                        Ok(i)
                    })
                    .await
            }));
            // Let each task reach the slot before the next is spawned
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.stats().total_requests, 5);
        assert_eq!(queue.stats().queue_length, 0);
        assert_eq!(queue.stats().processing, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_spaces_calls_of_one_class() {
        let (queue, _) = queue_with(PacingProfile::normal());
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..3 {
            queue
                .enqueue(EndpointClass::Attendance, &cancel, || async { Ok(()) })
                .await
                .unwrap();
        }

        // Two gaps of 800ms between three attendance calls
        assert!(start.elapsed() >= Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_is_per_class() {
        let (queue, _) = queue_with(PacingProfile::normal());
        let cancel = CancellationToken::new();
        let start = Instant::now();

        queue
            .enqueue(EndpointClass::Events, &cancel, || async { Ok(()) })
            .await
            .unwrap();
        queue
            .enqueue(EndpointClass::Members, &cancel, || async { Ok(()) })
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_tripped_breaker_rejects_without_running() {
        let (queue, breaker) = queue_with(PacingProfile::none());
        breaker.handle_response(401, None);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        let result: Result<()> = queue
            .enqueue(EndpointClass::Sections, &CancellationToken::new(), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Err(SyncError::AuthFailure));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_blocked_rejects_with_blocked() {
        let (queue, breaker) = queue_with(PacingProfile::none());
        breaker.set_blocked(true);

        let result: Result<()> = queue
            .enqueue(EndpointClass::Sections, &CancellationToken::new(), || async { Ok(()) })
            .await;
        assert_eq!(result, Err(SyncError::Blocked));
    }

    #[tokio::test]
    async fn test_cancelled_before_run_is_dropped() {
        let (queue, _) = queue_with(PacingProfile::none());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = queue
            .enqueue(EndpointClass::Events, &cancel, || async {
                panic!("cancelled task must not run")
            })
            .await;
        assert_eq!(result, Err(SyncError::Cancelled));
        assert_eq!(queue.stats().queue_length, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_task() {
        let (queue, _) = queue_with(PacingProfile::none());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = queue
            .enqueue(EndpointClass::Members, &cancel, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(SyncError::Cancelled));
        assert_eq!(queue.stats().processing, 0);
    }

    #[tokio::test]
    async fn test_stats_publisher_reports_totals() {
        let (queue, _) = queue_with(PacingProfile::none());
        let mut rx = queue.subscribe_stats();
        let cancel = CancellationToken::new();

        queue
            .enqueue(EndpointClass::Sections, &cancel, || async { Ok(()) })
            .await
            .unwrap();
        queue.publish_stats();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().total_requests, 1);
    }
}
