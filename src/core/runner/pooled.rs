//! Fixed pool of worker tasks fed FIFO from a bounded admission queue.

use crate::core::config::RunnerConfig;
use crate::core::data::Payload;
use crate::core::error::AppError;
use crate::core::runner::{ActionRunner, Engine, RunControl};
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Job {
    action_id: String,
    inputs: Payload,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<Payload, AppError>>,
    /// Released before the reply is sent, freeing one admission slot.
    permit: OwnedSemaphorePermit,
}

type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

pub struct PooledRunner {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    /// `workerCount + queueCapacity` slots: runs executing plus runs waiting.
    permits: Arc<Semaphore>,
    control: Arc<RunControl>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PooledRunner {
    pub fn new(engine: Arc<Engine>, config: &RunnerConfig) -> Result<Self, AppError> {
        let handle = Handle::try_current().map_err(|err| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("pooled runner needs a tokio runtime: {}", err),
            )
        })?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(receiver));
        let control = Arc::new(RunControl::new(config.stop_on_error));
        let workers = (0..config.worker_count)
            .map(|worker_id| {
                handle.spawn(worker_loop(
                    worker_id,
                    Arc::clone(&engine),
                    Arc::clone(&queue),
                    Arc::clone(&control),
                ))
            })
            .collect();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            permits: Arc::new(Semaphore::new(config.worker_count + config.queue_capacity)),
            control,
            workers: Mutex::new(workers),
        })
    }

    /// Admission slots currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    fn sender(&self) -> Result<mpsc::UnboundedSender<Job>, AppError> {
        let guard = self.sender.lock().map_err(|_| lock_poisoned())?;
        guard.clone().ok_or_else(|| {
            AppError::new(ErrorCategory::RunnerStopped, "runner has been shut down")
        })
    }
}

async fn worker_loop(
    worker_id: usize,
    engine: Arc<Engine>,
    queue: JobQueue,
    control: Arc<RunControl>,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        let job = { queue.lock().await.recv().await };
        let Some(Job {
            action_id,
            inputs,
            cancel,
            reply,
            permit,
        }) = job
        else {
            break;
        };
        tracing::debug!(worker_id, action_id = %action_id, "worker picked up run");
        let result = control.execute(&engine, &action_id, inputs, cancel).await;
        drop(permit);
        if reply.send(result).is_err() {
            tracing::debug!(worker_id, action_id = %action_id, "submitter went away");
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

fn lock_poisoned() -> AppError {
    AppError::new(ErrorCategory::InternalError, "runner lock poisoned")
}

#[async_trait]
impl ActionRunner for PooledRunner {
    async fn submit_with_cancel(
        &self,
        action_id: &str,
        inputs: Payload,
        cancel: CancellationToken,
    ) -> Result<Payload, AppError> {
        self.control.check()?;
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| {
                let mut err = AppError::new(
                    ErrorCategory::QueueFull,
                    "runner queue is full, retry later",
                );
                err.add_context("action_id", action_id);
                err
            })?;
        let (reply, receiver) = oneshot::channel();
        let job = Job {
            action_id: action_id.to_string(),
            inputs,
            cancel,
            reply,
            permit,
        };
        self.sender()?.send(job).map_err(|_| {
            AppError::new(ErrorCategory::RunnerStopped, "runner workers have exited")
        })?;
        receiver.await.map_err(|_| {
            AppError::new(
                ErrorCategory::InternalError,
                "worker dropped the run without replying",
            )
        })?
    }

    fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    async fn shutdown(&self) {
        self.control.stop();
        let workers = match (self.sender.lock(), self.workers.lock()) {
            (Ok(mut sender), Ok(mut workers)) => {
                sender.take();
                std::mem::take(&mut *workers)
            }
            _ => {
                tracing::error!("runner lock poisoned during shutdown");
                return;
            }
        };
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "worker ended abnormally");
            }
        }
        tracing::info!("runner shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RunnerType;

    fn config(worker_count: usize, queue_capacity: usize) -> RunnerConfig {
        RunnerConfig {
            runner_type: RunnerType::Pooled,
            worker_count,
            queue_capacity,
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn slots_cover_workers_and_queue() {
        let runner = PooledRunner::new(Arc::new(Engine::builder().build()), &config(2, 3)).unwrap();
        assert_eq!(runner.available_slots(), 5);
        let err = runner.submit("missing", Payload::new()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::UnknownAction);
        assert!(!runner.is_stopped());
        assert_eq!(runner.available_slots(), 5);

        runner.shutdown().await;
        let err = runner.submit("missing", Payload::new()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::RunnerStopped);
    }
}
