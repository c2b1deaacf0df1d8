//! Bounded worker pool for outbound adapter calls
//!
//! A fixed number of worker tasks drain a fixed-capacity queue, so the number
//! of concurrent calls to external platforms is capped no matter how many
//! publish requests or retry sequences are running.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A task panicked instead of returning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic(pub String);

/// The pool no longer accepts work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolClosed;

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: usize,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `queue_capacity` jobs
    ///
    /// Must be called from within a Tokio runtime. Both sizes are clamped to 1.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let joins = (0..workers)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move { worker_loop(worker_id, receiver).await })
            })
            .collect();

        Self {
            sender,
            workers,
            joins,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a task; waits while the queue is full
    ///
    /// The returned receiver yields the task's output, or `TaskPanic` if it
    /// panicked. A panicking task never takes its worker down with it.
    pub async fn submit<F, T>(
        &self,
        task: F,
    ) -> Result<oneshot::Receiver<Result<T, TaskPanic>>, PoolClosed>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .map_err(|payload| TaskPanic(panic_message(payload.as_ref())));
            // the submitter may have stopped waiting
            let _ = reply.send(result);
        });

        self.sender.send(job).await.map_err(|_| PoolClosed)?;
        Ok(receiver)
    }

    /// Stop accepting work and wait for queued jobs to finish
    pub async fn shutdown(self) {
        drop(self.sender);
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(worker_id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // only one worker waits on the channel at a time; the lock is released before running
        let job = { receiver.lock().await.recv().await };
        match job {
            Some(job) => job.await,
            None => {
                tracing::debug!("worker {} exiting: queue closed", worker_id);
                break;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
