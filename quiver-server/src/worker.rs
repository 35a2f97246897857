//! Fixed worker pool with non-blocking submission.
//!
//! Submission is a rendezvous: a job is only accepted when a worker is idle
//! to take it. Callers that cannot reserve a worker reject the request
//! immediately instead of queueing. Each worker respawns a fresh task after
//! completing a threshold of jobs, bounding per-worker state over long runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};

pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Jobs completed before a worker replaces itself.
const WORKER_RESET_THRESHOLD: usize = 1 << 16;

pub(crate) struct WorkerPool {
    jobs: mpsc::UnboundedSender<Job>,
    idle: Arc<Semaphore>,
}

impl WorkerPool {
    pub(crate) fn new(workers: u32) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let idle = Arc::new(Semaphore::new(workers as usize));
        for _ in 0..workers {
            spawn_worker(Arc::clone(&rx), Arc::clone(&idle));
        }
        WorkerPool { jobs, idle }
    }

    /// Claims an idle worker without blocking. Returns false when every
    /// worker is busy; the caller must not submit in that case.
    pub(crate) fn reserve(&self) -> bool {
        match self.idle.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Hands a job to the reserved worker. Must be paired with a successful
    /// [`reserve`](Self::reserve).
    pub(crate) fn submit(&self, job: Job) {
        // Send only fails when every worker exited, which means the pool is
        // being dropped; the job is discarded with it.
        let _ = self.jobs.send(job);
    }
}

fn spawn_worker(rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>, idle: Arc<Semaphore>) {
    tokio::spawn(async move {
        let mut completed = 0;
        loop {
            let job = { rx.lock().await.recv().await };
            let Some(job) = job else { return };
            job.await;
            idle.add_permits(1);
            completed += 1;
            if completed == WORKER_RESET_THRESHOLD {
                spawn_worker(rx, idle);
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_on_workers() {
        let pool = WorkerPool::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..4 {
            while !pool.reserve() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let tx = tx.clone();
            pool.submit(Box::pin(async move {
                let _ = tx.send(i);
            }));
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(
                tokio::time::timeout(Duration::from_secs(1), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reserve_fails_when_all_workers_busy() {
        let pool = WorkerPool::new(1);
        let gate = Arc::new(Semaphore::new(0));

        assert!(pool.reserve());
        let held = Arc::clone(&gate);
        pool.submit(Box::pin(async move {
            let _permit = held.acquire().await;
        }));

        // Give the worker time to pick the job up; the single worker is now
        // blocked, so no reservation can succeed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pool.reserve());

        gate.add_permits(1);
        let mut reserved = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if pool.reserve() {
                reserved = true;
                break;
            }
        }
        assert!(reserved, "worker became idle after the job finished");
    }
}
