//! `GatewayService` wires the Orchestrator Gateway, Image Builder, Instance
//! Lifecycle Coordinator and the background task-dispatch machinery into one
//! handle the API layer holds. It owns no domain state of its own — every
//! fact about an instance lives in the orchestrator, reached through the
//! `Coordinator`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::Sender;

use crate::builder::{DevcontainerConfig, ImageBuilder};
use crate::coordinator::{Coordinator, InstanceStatus, InstanceSummary, ResourceRequest, VsCodeCustomization};
use crate::naming::{object_name, ObjectKind};
use crate::orchestrator::OrchestratorGateway;
use crate::task::{BoxedTask, BuildJobParams, TaskBuilder};
use crate::tracker::{BuildState, BuildStatus};
use crate::worker::{TaskRouter, Worker};
use crate::{Error, ErrorKind};

pub struct GatewayService<G: OrchestratorGateway> {
    coordinator: Arc<Coordinator<G>>,
    task_router: TaskRouter,
    dispatch: Sender<BoxedTask>,
}

impl<G: OrchestratorGateway + 'static> GatewayService<G> {
    pub fn new(
        gateway: Arc<G>,
        docker_host: String,
        push_registry: String,
        pull_registry: String,
        base_domain: String,
    ) -> Self {
        let builder = ImageBuilder::new(docker_host, push_registry.clone(), pull_registry.clone());
        let coordinator = Arc::new(Coordinator::new(
            gateway,
            builder,
            base_domain,
            push_registry,
            pull_registry,
        ));

        let dispatcher = Worker::new();
        let dispatch = dispatcher.sender();
        tokio::spawn(dispatcher.start());

        Self {
            coordinator,
            task_router: TaskRouter::default(),
            dispatch,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<G>> {
        &self.coordinator
    }

    pub async fn create_simple(
        &self,
        user_id: &str,
        resources: ResourceRequest,
    ) -> Result<InstanceSummary, Error> {
        self.coordinator.create_simple(user_id, resources).await
    }

    /// Starts a build-backed create: writes the `queued` tracker
    /// synchronously, then hands the build off to the instance's dedicated
    /// worker and returns without waiting for it.
    pub async fn create_build_backed(
        &self,
        user_id: &str,
        resources: ResourceRequest,
        workspace_dir: PathBuf,
        workspace_guard: Option<tempfile::TempDir>,
        devcontainer_override: Option<DevcontainerConfig>,
        customization: VsCodeCustomization,
        discover_devcontainer: bool,
    ) -> Result<InstanceSummary, Error> {
        let (summary, token) = self
            .coordinator
            .start_build_create(user_id, resources.clone())
            .await?;

        let params = BuildJobParams {
            instance_id: summary.instance_id.clone(),
            user_id: user_id.to_string(),
            token,
            resources,
            workspace_dir,
            devcontainer_override,
            customization,
            discover_devcontainer,
            workspace_guard,
        };

        TaskBuilder::new(self.coordinator.clone())
            .send(params, &self.task_router, &self.dispatch)
            .await?;

        Ok(summary)
    }

    /// Reads the current view of an instance: its configuration record if
    /// deployed, or its in-flight build status otherwise.
    pub async fn get(&self, instance_id: &str, user_id: &str) -> Result<InstanceSummary, Error> {
        let config_name = object_name(ObjectKind::Config, instance_id, user_id);
        match self.coordinator.gateway().read_config(&config_name).await {
            Ok(record) => {
                let status = match self.coordinator.status(instance_id).await {
                    Ok(status) => status,
                    Err(err) if err.kind() == ErrorKind::NotFound => InstanceStatus::Pending,
                    Err(err) => return Err(err),
                };
                let base_image = record
                    .data
                    .get("base_image")
                    .cloned()
                    .unwrap_or_else(|| crate::coordinator::DEFAULT_BASE_IMAGE.to_string());
                let token = record.data.get("TOKEN").cloned().unwrap_or_default();
                Ok(InstanceSummary {
                    url: format!(
                        "https://{}?tkn={token}",
                        crate::naming::instance_path(instance_id)
                    ),
                    access_token: token,
                    status,
                    base_image,
                    devcontainer_image: record.data.get("devcontainer_image").cloned(),
                    build_logs_url: None,
                    instance_id: instance_id.to_string(),
                })
            }
            Err(_) => {
                let build_status = self.coordinator.tracker().read(instance_id).await?;
                let status = match build_status.status {
                    BuildState::Queued => InstanceStatus::Queued,
                    BuildState::Building => InstanceStatus::Building,
                    BuildState::Deploying => InstanceStatus::Deploying,
                    BuildState::Completed => InstanceStatus::Running,
                    BuildState::Failed => {
                        return Err(Error::custom(
                            ErrorKind::Internal,
                            build_status.error.unwrap_or_else(|| "build failed".to_string()),
                        ))
                    }
                };
                Ok(InstanceSummary {
                    url: format!("https://{}", crate::naming::instance_path(instance_id)),
                    access_token: String::new(),
                    status,
                    base_image: crate::coordinator::DEFAULT_BASE_IMAGE.to_string(),
                    devcontainer_image: None,
                    build_logs_url: Some(format!(
                        "{}/build-logs",
                        crate::naming::instance_path(instance_id)
                    )),
                    instance_id: instance_id.to_string(),
                })
            }
        }
    }

    pub async fn build_status(&self, instance_id: &str) -> Result<BuildStatus, Error> {
        self.coordinator.tracker().read(instance_id).await
    }

    pub async fn build_logs(&self, instance_id: &str) -> Result<(BuildState, Vec<String>), Error> {
        let status = self.coordinator.tracker().read(instance_id).await?;
        let logs_name = object_name(ObjectKind::BuildLogs, instance_id, "");
        let logs = match self.coordinator.gateway().read_config(&logs_name).await {
            Ok(record) => record
                .data
                .get("logs")
                .map(|logs| logs.lines().map(str::to_string).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        Ok((status.status, logs))
    }

    pub async fn delete(&self, instance_id: &str, user_id: &str) -> Result<(), Error> {
        self.coordinator.delete(instance_id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FakeOrchestrator;

    fn resources() -> ResourceRequest {
        ResourceRequest {
            storage_size: None,
            shared_storage_size: None,
            memory_request: None,
            memory_limit: None,
            cpu_request: None,
            cpu_limit: None,
            base_image: None,
            vscode_version: None,
        }
    }

    #[tokio::test]
    async fn create_simple_then_get_round_trips() {
        let gateway = FakeOrchestrator::new();
        let service = GatewayService::new(
            gateway,
            "tcp://localhost:2375".to_string(),
            "localhost:32000".to_string(),
            "localhost:32000".to_string(),
            "vscode.local".to_string(),
        );

        let created = service.create_simple("erin", resources()).await.unwrap();
        let fetched = service.get(&created.instance_id, "erin").await.unwrap();
        assert_eq!(fetched.instance_id, created.instance_id);
        assert_eq!(fetched.access_token, created.access_token);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let gateway = FakeOrchestrator::new();
        let service = GatewayService::new(
            gateway,
            "tcp://localhost:2375".to_string(),
            "localhost:32000".to_string(),
            "localhost:32000".to_string(),
            "vscode.local".to_string(),
        );
        service.delete("ghost-00000000", "ghost").await.unwrap();
        service.delete("ghost-00000000", "ghost").await.unwrap();
    }
}
