use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::task::{BoxedTask, TaskResult};
use crate::Error;

pub const WORKER_QUEUE_SIZE: usize = 2048;

pub struct Worker {
    send: Option<Sender<BoxedTask>>,
    recv: Receiver<BoxedTask>,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    pub fn new() -> Self {
        let (send, recv) = channel(WORKER_QUEUE_SIZE);
        Self {
            send: Some(send),
            recv,
        }
    }

    /// Returns a [Sender] to push work to this worker.
    pub fn sender(&self) -> Sender<BoxedTask> {
        Sender::clone(self.send.as_ref().unwrap())
    }

    /// Starts the worker, waiting and processing elements from the queue
    /// until the last sending end for the channel is dropped, at which
    /// point this future resolves.
    pub async fn start(mut self) -> Result<Self, Error> {
        // Drop the self-sender owned by this worker to prevent a deadlock if
        // all the other senders have already been dropped at this point.
        let _ = self.send.take().unwrap();
        debug!("starting worker");

        while let Some(mut work) = self.recv.recv().await {
            loop {
                match work.poll(()).await {
                    TaskResult::Done(_) | TaskResult::Cancelled => break,
                    TaskResult::Pending(_) => continue,
                    TaskResult::Err(err) => {
                        warn!("task failed: {err}");
                        break;
                    }
                }
            }
        }

        Ok(self)
    }
}

/// Routes a task to the worker dedicated to a given instance id, so two
/// build jobs for the same instance never run concurrently. A worker is
/// created lazily on the first task routed to a not-yet-seen instance id.
#[derive(Clone, Default)]
pub struct TaskRouter {
    table: Arc<RwLock<HashMap<String, Sender<BoxedTask>>>>,
}

impl TaskRouter {
    pub async fn route(
        &self,
        instance_id: &str,
        task: BoxedTask,
    ) -> Result<(), SendError<BoxedTask>> {
        let mut table = self.table.write().await;
        if let Some(sender) = table.get(instance_id) {
            sender.send(task).await
        } else {
            let worker = Worker::new();
            let sender = worker.sender();

            tokio::spawn(worker.start());

            let res = sender.send(task).await;
            table.insert(instance_id.to_string(), sender);
            res
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskResult as TR};

    struct Once(bool);

    #[async_trait]
    impl Task<()> for Once {
        type Output = ();
        type Error = Error;

        async fn poll(&mut self, _ctx: ()) -> TR<(), Error> {
            if self.0 {
                TR::Done(())
            } else {
                self.0 = true;
                TR::Pending(())
            }
        }
    }

    #[tokio::test]
    async fn route_creates_one_worker_per_instance() {
        let router = TaskRouter::default();
        router
            .route("alice-abc12345", Box::new(Once(false)))
            .await
            .unwrap();
        router
            .route("alice-abc12345", Box::new(Once(false)))
            .await
            .unwrap();
        assert_eq!(router.table.read().await.len(), 1);
    }
}
