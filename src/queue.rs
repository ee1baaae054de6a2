//! Admission queue bounding concurrent render operations.
//!
//! Capture jobs submitted while all slots are taken wait in FIFO order;
//! wakeups are driven by permit release, never by polling. A job's failure
//! only settles that job and frees its slot.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionQueue {
    /// Creates a queue running at most `limit` jobs concurrently.
    /// A limit of zero is clamped to one.
    pub fn new(limit: usize) -> Self {
        let permits = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            limit: permits,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free; waiting jobs exist only when this is zero.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs `job` once a slot is free, suspending the caller until the job
    /// settles. Tokio's semaphore is fair, so jobs dispatch in submission
    /// order among waiters.
    pub async fn submit<F, T>(&self, job: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("admission queue semaphore closed");
        job.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::task::yield_now;

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let queue = AdmissionQueue::new(0);
        assert_eq!(queue.limit(), 1);
        assert_eq!(queue.available(), 1);
    }

    #[tokio::test]
    async fn runs_the_job_and_returns_its_output() {
        let queue = AdmissionQueue::new(2);
        let out = queue.submit(async { 41 + 1 }).await;
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn job_failure_settles_only_that_job() {
        let queue = AdmissionQueue::new(1);
        let failed: Result<(), String> = queue.submit(async { Err("boom".to_string()) }).await;
        assert!(failed.is_err());

        // The slot freed by the failed job admits the next one.
        let ok: Result<u32, String> = queue.submit(async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let queue = AdmissionQueue::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = queue.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .submit(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        yield_now().await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn five_jobs_with_limit_three_dispatch_in_order() {
        // Current-thread runtime: spawned tasks run to their first suspension
        // point once yielded to, so waiter registration order is submission
        // order.
        let queue = AdmissionQueue::new(3);
        let started: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for i in 1..=5 {
            let queue = queue.clone();
            let started = started.clone();
            let release = release.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .submit(async {
                        started.lock().unwrap().push(i);
                        release.notified().await;
                    })
                    .await;
            }));
            yield_now().await;
            yield_now().await;
        }

        // Jobs 1-3 occupy the slots; 4 and 5 are pending.
        assert_eq!(*started.lock().unwrap(), vec![1, 2, 3]);

        release.notify_waiters();
        for _ in 0..50 {
            yield_now().await;
        }
        assert_eq!(*started.lock().unwrap(), vec![1, 2, 3, 4, 5]);

        release.notify_waiters();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn every_submission_eventually_settles() {
        let queue = AdmissionQueue::new(2);
        let settled = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..20 {
            let queue = queue.clone();
            let settled = settled.clone();
            handles.push(tokio::spawn(async move {
                let result: Result<usize, String> = queue
                    .submit(async move {
                        if i % 3 == 0 {
                            Err(format!("job {i} failed"))
                        } else {
                            Ok(i)
                        }
                    })
                    .await;
                let _ = result;
                settled.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(settled.load(Ordering::SeqCst), 20);
        assert_eq!(queue.available(), 2);
    }
}
