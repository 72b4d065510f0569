//! Bounded worker pool for ingestion jobs.
//!
//! A fixed set of tasks drains one bounded queue. Submission never blocks
//! and never drops work: when every queue slot is taken the submitting
//! thread runs the job itself, which throttles upload producers to the
//! speed of the pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker tasks draining the queue. Default: 5.
    pub workers: usize,
    /// Queue slots before submitters run jobs themselves. Default: 100.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: 5,
            queue_capacity: 100,
        }
    }
}

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the worker tasks on the current tokio runtime.
    pub fn spawn(mut config: PoolConfig) -> Self {
        config.workers = config.workers.max(1);
        config.queue_capacity = config.queue_capacity.max(1);

        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the receiver only while waiting; the job runs
                    // with the lock released so the other workers keep
                    // draining.
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        // Jobs do blocking file and database work.
                        Some(job) => {
                            let _ = tokio::task::spawn_blocking(job).await;
                        }
                        None => break,
                    }
                }
            }));
        }

        WorkerPool { tx, workers }
    }

    /// Queue a job, or run it on the calling thread when no slot is free.
    pub fn submit(&self, job: Job) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::debug!("ingestion queue full, running job on the submitting thread");
                job();
            }
            Err(TrySendError::Closed(job)) => job(),
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;

    #[tokio::test]
    async fn drains_every_submitted_job() {
        let pool = WorkerPool::spawn(PoolConfig {
            workers: 2,
            queue_capacity: 16,
        });
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn full_queue_runs_the_job_on_the_submitter() {
        let pool = WorkerPool::spawn(PoolConfig {
            workers: 1,
            queue_capacity: 1,
        });

        // Park the only worker on a gate and confirm it picked the job up.
        // The wait yields so the current-thread runtime can poll the worker.
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let (started_tx, started_rx) = std_mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            started_tx.send(()).ok();
            gate_rx.recv().ok();
        }));
        let mut started = false;
        for _ in 0..500 {
            if started_rx.try_recv().is_ok() {
                started = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(started, "worker picks up the first job");

        // Fill the single queue slot while the worker is parked.
        let queued = Arc::new(AtomicUsize::new(0));
        {
            let queued = Arc::clone(&queued);
            pool.submit(Box::new(move || {
                queued.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(queued.load(Ordering::SeqCst), 0, "second job waits in the queue");

        // No slot left: this one must run inline before submit returns.
        let inline = Arc::new(AtomicUsize::new(0));
        {
            let inline = Arc::clone(&inline);
            pool.submit(Box::new(move || {
                inline.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(inline.load(Ordering::SeqCst), 1);

        gate_tx.send(()).expect("release the parked worker");
        pool.shutdown().await;
        assert_eq!(queued.load(Ordering::SeqCst), 1, "queued job ran before shutdown");
    }

    #[tokio::test]
    async fn zero_sizes_clamp_to_one() {
        let pool = WorkerPool::spawn(PoolConfig {
            workers: 0,
            queue_capacity: 0,
        });
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            pool.submit(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
