use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Future;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;

use crate::builder::DevcontainerConfig;
use crate::coordinator::{Coordinator, ResourceRequest, VsCodeCustomization};
use crate::orchestrator::OrchestratorGateway;
use crate::worker::TaskRouter;
use crate::{Error, ErrorKind};

/// Maximum total time a build job is allowed to run before it is cancelled
/// out from under its worker. Builds download a base image, run the
/// devcontainer tool, and push, all of which can be slow on a cold cache.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Maximum time to wait for a task to be accepted onto its worker's channel.
pub const TASK_SEND_TIMEOUT: Duration = Duration::from_secs(9);

#[async_trait]
pub trait Task<Ctx>: Send {
    type Output;
    type Error;

    async fn poll(&mut self, ctx: Ctx) -> TaskResult<Self::Output, Self::Error>;
}

#[async_trait]
impl<Ctx, T> Task<Ctx> for Box<T>
where
    Ctx: Send + 'static,
    T: Task<Ctx> + ?Sized,
{
    type Output = T::Output;
    type Error = T::Error;

    async fn poll(&mut self, ctx: Ctx) -> TaskResult<Self::Output, Self::Error> {
        self.as_mut().poll(ctx).await
    }
}

#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum TaskResult<R, E> {
    /// More work needs to be done.
    Pending(R),
    /// No further work needed.
    Done(R),
    /// Task has been cancelled.
    Cancelled,
    /// Task has failed.
    Err(E),
}

impl<R, E> TaskResult<R, E> {
    pub fn to_str(&self) -> &str {
        match self {
            Self::Pending(_) => "pending",
            Self::Done(_) => "done",
            Self::Cancelled => "cancelled",
            Self::Err(_) => "error",
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            Self::Done(_) | Self::Cancelled | Self::Err(_) => true,
            Self::Pending(_) => false,
        }
    }
}

pub type BoxedTask<Ctx = (), O = ()> = Box<dyn Task<Ctx, Output = O, Error = Error>>;

/// Everything needed to run one build-backed create's background half.
/// Built by the API layer once the synchronous part of the request (identity
/// allocation, `queued` tracker write) has already completed.
pub struct BuildJobParams {
    pub instance_id: String,
    pub user_id: String,
    pub token: String,
    pub resources: ResourceRequest,
    pub workspace_dir: std::path::PathBuf,
    pub devcontainer_override: Option<DevcontainerConfig>,
    pub customization: VsCodeCustomization,
    /// When set, the job searches `workspace_dir` for a `devcontainer.json`
    /// once the build starts, instead of expecting one to already be
    /// resolved. A missing file fails the build in the background rather
    /// than rejecting the request up front.
    pub discover_devcontainer: bool,
    /// Keeps the uploaded workspace's temp directory alive for the duration
    /// of the build; dropped (and cleaned up) once the job finishes.
    pub workspace_guard: Option<tempfile::TempDir>,
}

/// A single-shot task that drives one instance's build to completion. Wraps
/// [`Coordinator::run_build_job`], which already records every outcome
/// (including failure) in the tracker itself, so this task's own
/// `Output`/`Error` are both `()` — its job is only to run exactly once, be
/// cancellable by a timeout, and be routed so two builds for the same
/// instance never interleave.
pub struct BuildJob<G: OrchestratorGateway> {
    coordinator: Arc<Coordinator<G>>,
    params: Option<BuildJobParams>,
}

impl<G: OrchestratorGateway> BuildJob<G> {
    pub fn new(coordinator: Arc<Coordinator<G>>, params: BuildJobParams) -> Self {
        Self {
            coordinator,
            params: Some(params),
        }
    }
}

#[async_trait]
impl<G: OrchestratorGateway + 'static> Task<()> for BuildJob<G> {
    type Output = ();
    type Error = Error;

    async fn poll(&mut self, _ctx: ()) -> TaskResult<Self::Output, Self::Error> {
        let Some(params) = self.params.take() else {
            return TaskResult::Done(());
        };

        let workspace_guard = params.workspace_guard;
        self.coordinator
            .clone()
            .run_build_job(
                params.instance_id,
                params.user_id,
                params.token,
                params.resources,
                params.workspace_dir,
                params.devcontainer_override,
                params.customization,
                params.discover_devcontainer,
            )
            .await;
        drop(workspace_guard);

        TaskResult::Done(())
    }
}

/// Routes a boxed task to the worker dedicated to `instance_id`, creating
/// that worker on first use.
pub struct Route<T> {
    instance_id: String,
    inner: Option<T>,
    router: TaskRouter,
}

impl<T> Route<T> {
    pub fn to(instance_id: String, what: T, router: TaskRouter) -> Self {
        Self {
            instance_id,
            inner: Some(what),
            router,
        }
    }
}

#[async_trait]
impl Task<()> for Route<BoxedTask> {
    type Output = ();
    type Error = Error;

    async fn poll(&mut self, _ctx: ()) -> TaskResult<Self::Output, Self::Error> {
        if let Some(task) = self.inner.take() {
            match self.router.route(&self.instance_id, task).await {
                Ok(_) => TaskResult::Done(()),
                Err(_) => TaskResult::Err(Error::from_kind(ErrorKind::Internal)),
            }
        } else {
            TaskResult::Done(())
        }
    }
}

pub struct TaskHandle {
    rx: oneshot::Receiver<()>,
}

impl Future for TaskHandle {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

pub struct AndThenNotify<T> {
    inner: T,
    notify: Option<oneshot::Sender<()>>,
}

impl<T> AndThenNotify<T> {
    pub fn after(task: T) -> (Self, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: task,
                notify: Some(tx),
            },
            TaskHandle { rx },
        )
    }
}

#[async_trait]
impl<T, Ctx> Task<Ctx> for AndThenNotify<T>
where
    Ctx: Send + 'static,
    T: Task<Ctx>,
{
    type Output = T::Output;
    type Error = T::Error;

    async fn poll(&mut self, ctx: Ctx) -> TaskResult<Self::Output, Self::Error> {
        let out = self.inner.poll(ctx).await;
        if out.is_done() {
            let _ = self.notify.take().unwrap().send(());
        }
        out
    }
}

pub struct WithTimeout<T> {
    inner: T,
    start: Option<Instant>,
    timeout: Duration,
}

impl<T> WithTimeout<T> {
    pub fn on(timeout: Duration, inner: T) -> Self {
        Self {
            inner,
            start: None,
            timeout,
        }
    }
}

#[async_trait]
impl<T, Ctx> Task<Ctx> for WithTimeout<T>
where
    Ctx: Send + 'static,
    T: Task<Ctx>,
{
    type Output = T::Output;
    type Error = T::Error;

    async fn poll(&mut self, ctx: Ctx) -> TaskResult<Self::Output, Self::Error> {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }

        if Instant::now() - *self.start.as_ref().unwrap() > self.timeout {
            warn!(
                "task has timed out: was running for more than {}s",
                self.timeout.as_secs()
            );
            return TaskResult::Cancelled;
        }

        self.inner.poll(ctx).await
    }
}

/// Builds a [`BuildJob`], wraps it with a timeout and a completion
/// notification, and hands it to the instance's dedicated worker.
pub struct TaskBuilder<G: OrchestratorGateway> {
    coordinator: Arc<Coordinator<G>>,
    timeout: Duration,
}

impl<G: OrchestratorGateway + 'static> TaskBuilder<G> {
    pub fn new(coordinator: Arc<Coordinator<G>>) -> Self {
        Self {
            coordinator,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn send(
        self,
        params: BuildJobParams,
        router: &TaskRouter,
        sender: &Sender<BoxedTask>,
    ) -> Result<TaskHandle, Error> {
        let instance_id = params.instance_id.clone();
        let job = WithTimeout::on(self.timeout, BuildJob::new(self.coordinator, params));
        let (task, handle) = AndThenNotify::after(job);
        let routed = Route::to(instance_id, Box::new(task) as BoxedTask, router.clone());
        match timeout(TASK_SEND_TIMEOUT, sender.send(Box::new(routed))).await {
            Ok(Ok(_)) => Ok(handle),
            _ => Err(Error::from_kind(ErrorKind::UpstreamTransient)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverEnding;

    #[async_trait]
    impl Task<()> for NeverEnding {
        type Output = ();
        type Error = ();

        async fn poll(&mut self, _ctx: ()) -> TaskResult<Self::Output, Self::Error> {
            TaskResult::Pending(())
        }
    }

    #[tokio::test]
    async fn task_with_timeout_cancels_once_exceeded() {
        let timeout = Duration::from_millis(50);
        let mut task_with_timeout = WithTimeout::on(timeout, NeverEnding);

        loop {
            match task_with_timeout.poll(()).await {
                TaskResult::Pending(()) => tokio::time::sleep(Duration::from_millis(20)).await,
                TaskResult::Cancelled => break,
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }
}
