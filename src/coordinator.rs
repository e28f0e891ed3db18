//! Instance Lifecycle Coordinator: the top-level state machine that turns a
//! create request into a running (or queued-and-building) instance, and
//! that unwinds an instance back to nothing on delete.
//!
//! The synchronous path (`create_simple`) and the asynchronous path
//! (`start_build_create` + the background job it spawns) share the same
//! object-creation order: config, workspace claim, workload, service,
//! ingress. Deletion walks the reverse of that order and tolerates every
//! step already being gone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum::Display;

use crate::builder::{DevcontainerConfig, ImageBuilder};
use crate::naming::{self, object_name, ObjectKind};
use crate::orchestrator::{OrchestratorGateway, WorkloadSpec, WorkloadStatus};
use crate::template::{render_launch_script, LaunchScriptParams};
use crate::tracker::{BuildState, BuildTracker};
use crate::{Error, ErrorKind};

pub const DEFAULT_STORAGE_SIZE: &str = "2Gi";
pub const DEFAULT_SHARED_STORAGE_SIZE: &str = "5Gi";
pub const DEFAULT_MEMORY_REQUEST: &str = "512Mi";
pub const DEFAULT_MEMORY_LIMIT: &str = "2Gi";
pub const DEFAULT_CPU_REQUEST: &str = "200m";
pub const DEFAULT_CPU_LIMIT: &str = "1000m";
pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:22.04";
pub const DEFAULT_VSCODE_VERSION: &str = "1.97.2";

const TRACKER_GRACE_PERIOD: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum InstanceStatus {
    Creating,
    Queued,
    Building,
    Deploying,
    Running,
    Pending,
    Deleted,
}

/// Resource and image parameters common to every create path. Optional
/// fields default exactly as the reference resource envelope does.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub storage_size: Option<String>,
    pub shared_storage_size: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub base_image: Option<String>,
    pub vscode_version: Option<String>,
}

impl ResourceRequest {
    fn storage_size(&self) -> &str {
        self.storage_size.as_deref().unwrap_or(DEFAULT_STORAGE_SIZE)
    }
    fn shared_storage_size(&self) -> &str {
        self.shared_storage_size
            .as_deref()
            .unwrap_or(DEFAULT_SHARED_STORAGE_SIZE)
    }
    fn memory_request(&self) -> &str {
        self.memory_request.as_deref().unwrap_or(DEFAULT_MEMORY_REQUEST)
    }
    fn memory_limit(&self) -> &str {
        self.memory_limit.as_deref().unwrap_or(DEFAULT_MEMORY_LIMIT)
    }
    fn cpu_request(&self) -> &str {
        self.cpu_request.as_deref().unwrap_or(DEFAULT_CPU_REQUEST)
    }
    fn cpu_limit(&self) -> &str {
        self.cpu_limit.as_deref().unwrap_or(DEFAULT_CPU_LIMIT)
    }
    fn base_image(&self) -> &str {
        self.base_image.as_deref().unwrap_or(DEFAULT_BASE_IMAGE)
    }
    fn vscode_version(&self) -> &str {
        self.vscode_version.as_deref().unwrap_or(DEFAULT_VSCODE_VERSION)
    }
}

/// The VS-code-editor customization blob stored in the Session
/// Configuration Record: extensions, settings, and an optional post-create
/// hook, exactly as a `devcontainer.json`'s `customizations.vscode` block
/// and `postCreateCommand` describe them.
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct VsCodeCustomization {
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub post_create_command: Option<String>,
}

/// Extracts the extensions/settings/post-create-command a `devcontainer.json`
/// asks for. Unrecognized fields are simply ignored, matching the reference
/// implementation's tolerance of `devcontainer.json` dialects it doesn't
/// otherwise support.
pub(crate) fn customization_from_devcontainer(devcontainer: &serde_json::Value) -> VsCodeCustomization {
    let extensions = devcontainer
        .pointer("/customizations/vscode/extensions")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let settings = devcontainer
        .pointer("/customizations/vscode/settings")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let post_create_command = devcontainer
        .get("postCreateCommand")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    VsCodeCustomization {
        extensions,
        settings,
        post_create_command,
    }
}

/// Walks a directory tree depth-first looking for a file named
/// `devcontainer.json`, wherever in the uploaded archive it happens to live.
pub(crate) fn find_devcontainer_json(root: &Path) -> Option<PathBuf> {
    fn walk(dir: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(found) = walk(&path) {
                    return Some(found);
                }
            } else if path.file_name().and_then(|n| n.to_str()) == Some("devcontainer.json") {
                return Some(path);
            }
        }
        None
    }
    walk(root)
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub url: String,
    pub access_token: String,
    pub status: InstanceStatus,
    pub base_image: String,
    pub devcontainer_image: Option<String>,
    pub build_logs_url: Option<String>,
}

pub struct Coordinator<G: OrchestratorGateway> {
    gateway: Arc<G>,
    builder: ImageBuilder,
    tracker: BuildTracker<G>,
    base_domain: String,
    /// Address the builder pushes to. Resolved once at startup from the
    /// cluster's node list when the declared registry is a bare
    /// `localhost:<port>` dev registry not reachable from outside a node's
    /// own context; falls back to the declared registry when no node
    /// address was discovered.
    push_registry: String,
    /// Address pods pull from — the declared registry, unchanged.
    pull_registry: String,
}

impl<G: OrchestratorGateway + 'static> Coordinator<G> {
    pub fn new(
        gateway: Arc<G>,
        builder: ImageBuilder,
        base_domain: String,
        push_registry: String,
        pull_registry: String,
    ) -> Self {
        let tracker = BuildTracker::new(gateway.clone());
        Self {
            gateway,
            builder,
            tracker,
            base_domain,
            push_registry,
            pull_registry,
        }
    }

    /// Rewrites a pushed image's registry host from the address the builder
    /// pushed to, to the address pods should pull from, when those differ.
    fn resolve_pull_image(&self, image: &str) -> String {
        if self.push_registry == self.pull_registry {
            image.to_string()
        } else {
            image.replacen(&self.push_registry, &self.pull_registry, 1)
        }
    }

    fn instance_url(&self, instance_id: &str, token: &str) -> String {
        format!(
            "https://{}{}?tkn={token}",
            self.base_domain,
            naming::instance_path(instance_id)
        )
    }

    async fn ensure_shared_claim(&self, user_id: &str, size: &str) -> Result<(), Error> {
        let name = object_name(ObjectKind::SharedVolume, "", user_id);
        let labels: BTreeMap<String, String> =
            [("app".to_string(), crate::orchestrator::APP_LABEL.to_string())]
                .into_iter()
                .collect();
        self.gateway.ensure_volume_claim(&name, labels, size).await?;
        Ok(())
    }

    async fn write_config_record(
        &self,
        instance_id: &str,
        user_id: &str,
        token: &str,
        resources: &ResourceRequest,
        devcontainer_image: Option<&str>,
        customization: &VsCodeCustomization,
    ) -> Result<(), Error> {
        let name = object_name(ObjectKind::Config, instance_id, user_id);
        let mut data = BTreeMap::new();
        data.insert("TOKEN".to_string(), token.to_string());
        data.insert("user_id".to_string(), user_id.to_string());
        data.insert("base_image".to_string(), resources.base_image().to_string());
        data.insert(
            "vscode_version".to_string(),
            resources.vscode_version().to_string(),
        );
        if let Some(image) = devcontainer_image {
            data.insert("devcontainer_image".to_string(), image.to_string());
        }
        data.insert(
            "vscode_customization".to_string(),
            serde_json::to_string(customization)
                .map_err(|err| Error::source(ErrorKind::Internal, err))?,
        );

        let labels: BTreeMap<String, String> = [
            ("app".to_string(), crate::orchestrator::APP_LABEL.to_string()),
            ("instance".to_string(), instance_id.to_string()),
            ("user".to_string(), user_id.to_string()),
        ]
        .into_iter()
        .collect();

        self.gateway.ensure_config(&name, labels, data).await?;
        Ok(())
    }

    /// Persists the build's collected log lines to `<instance_id>-build-logs`.
    /// Written once the build step completes (successfully or not) so that
    /// `GET /instances/{id}/build-logs` has something to read even before
    /// deploy finishes.
    async fn write_build_logs(&self, instance_id: &str, logs: &[String]) -> Result<(), Error> {
        let name = object_name(ObjectKind::BuildLogs, instance_id, "");
        let mut data = BTreeMap::new();
        data.insert("logs".to_string(), logs.join("\n"));
        data.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        let labels: BTreeMap<String, String> = [
            ("app".to_string(), crate::orchestrator::APP_LABEL.to_string()),
            ("instance".to_string(), instance_id.to_string()),
        ]
        .into_iter()
        .collect();

        self.gateway.ensure_config(&name, labels, data).await?;
        Ok(())
    }

    async fn create_workload_triple(
        &self,
        instance_id: &str,
        user_id: &str,
        resources: &ResourceRequest,
        image: &str,
        token: &str,
        customization: &VsCodeCustomization,
    ) -> Result<(), Error> {
        let workspace_claim = object_name(ObjectKind::WorkspaceVolume, instance_id, user_id);
        let labels: BTreeMap<String, String> = [
            ("app".to_string(), crate::orchestrator::APP_LABEL.to_string()),
            ("instance".to_string(), instance_id.to_string()),
        ]
        .into_iter()
        .collect();
        self.gateway
            .ensure_volume_claim(&workspace_claim, labels, resources.storage_size())
            .await?;

        let script = render_launch_script(&LaunchScriptParams {
            instance_path: &naming::instance_path(instance_id),
            vscode_version: resources.vscode_version(),
            extensions: &customization.extensions,
            settings: &customization.settings,
            post_create_command: customization.post_create_command.as_deref(),
        });

        let spec = WorkloadSpec {
            instance_id: instance_id.to_string(),
            user_id: user_id.to_string(),
            image: self.resolve_pull_image(image),
            launch_script: script,
            memory_request: resources.memory_request().to_string(),
            memory_limit: resources.memory_limit().to_string(),
            cpu_request: resources.cpu_request().to_string(),
            cpu_limit: resources.cpu_limit().to_string(),
        };
        let _ = token; // connection token is delivered via the config record, not interpolated here
        self.gateway.create_workload(&spec).await?;
        self.gateway.create_service(instance_id).await?;
        self.gateway
            .create_ingress(instance_id, &self.base_domain)
            .await?;
        Ok(())
    }

    /// The synchronous, no-build create path.
    pub async fn create_simple(
        &self,
        user_id: &str,
        resources: ResourceRequest,
    ) -> Result<InstanceSummary, Error> {
        let instance_id = naming::instance_id(user_id)?;
        let token = naming::access_token();

        self.ensure_shared_claim(user_id, resources.shared_storage_size())
            .await?;
        self.write_config_record(
            &instance_id,
            user_id,
            &token,
            &resources,
            None,
            &VsCodeCustomization::default(),
        )
        .await?;
        self.create_workload_triple(
            &instance_id,
            user_id,
            &resources,
            resources.base_image(),
            &token,
            &VsCodeCustomization::default(),
        )
        .await?;

        Ok(InstanceSummary {
            url: self.instance_url(&instance_id, &token),
            access_token: token,
            status: InstanceStatus::Creating,
            base_image: resources.base_image().to_string(),
            devcontainer_image: None,
            build_logs_url: None,
            instance_id,
        })
    }

    /// Starts a build-backed create: allocates the identifier, writes the
    /// `queued` tracker, and returns immediately. The actual build and
    /// deploy run in the background via [`Coordinator::run_build_job`],
    /// which the caller is expected to spawn as an independent task.
    pub async fn start_build_create(
        &self,
        user_id: &str,
        resources: ResourceRequest,
    ) -> Result<(InstanceSummary, String), Error> {
        let instance_id = naming::instance_id(user_id)?;
        let token = naming::access_token();

        let mut initial = BTreeMap::new();
        initial.insert("user_id".to_string(), user_id.to_string());
        initial.insert("TOKEN".to_string(), token.clone());
        initial.insert("base_image".to_string(), resources.base_image().to_string());
        self.tracker.start(&instance_id, initial).await?;

        let predicted_image = format!("{}/vscode-devcontainer-{instance_id}:latest", self.pull_registry);

        let summary = InstanceSummary {
            url: self.instance_url(&instance_id, &token),
            access_token: token.clone(),
            status: InstanceStatus::Queued,
            base_image: resources.base_image().to_string(),
            devcontainer_image: Some(predicted_image),
            build_logs_url: Some(format!(
                "{}/build-logs",
                naming::instance_path(&instance_id)
            )),
            instance_id,
        };
        Ok((summary, token))
    }

    /// Runs to completion the background half of a build-backed create.
    /// Intended to be spawned with `tokio::spawn` right after
    /// [`Coordinator::start_build_create`] returns.
    pub async fn run_build_job(
        self: Arc<Self>,
        instance_id: String,
        user_id: String,
        token: String,
        resources: ResourceRequest,
        workspace_dir: PathBuf,
        devcontainer_override: Option<DevcontainerConfig>,
        mut customization: VsCodeCustomization,
        discover_devcontainer: bool,
    ) {
        if let Err(err) = self
            .tracker
            .set_state(&instance_id, BuildState::Building, None)
            .await
        {
            tracing::error!(%instance_id, error = %err, "failed to mark build as building");
            return;
        }

        let mut workspace_dir = workspace_dir;
        if discover_devcontainer {
            let devcontainer_path = match find_devcontainer_json(&workspace_dir) {
                Some(path) => path,
                None => {
                    let _ = self
                        .tracker
                        .set_state(
                            &instance_id,
                            BuildState::Failed,
                            Some("uploaded workspace archive does not contain a devcontainer.json"),
                        )
                        .await;
                    return;
                }
            };

            let parsed = std::fs::read(&devcontainer_path)
                .map_err(Error::from)
                .and_then(|bytes| {
                    serde_json::from_slice::<serde_json::Value>(&bytes)
                        .map_err(|err| Error::custom(ErrorKind::InvalidRequest, format!("invalid devcontainer.json: {err}")))
                });

            let devcontainer = match parsed {
                Ok(devcontainer) => devcontainer,
                Err(err) => {
                    let _ = self
                        .tracker
                        .set_state(&instance_id, BuildState::Failed, Some(&err.to_string()))
                        .await;
                    return;
                }
            };

            customization = customization_from_devcontainer(&devcontainer);
            workspace_dir = devcontainer_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or(workspace_dir);
        }

        let outcome = self
            .builder
            .build(&instance_id, &workspace_dir, devcontainer_override.as_ref())
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = self
                    .tracker
                    .set_state(&instance_id, BuildState::Failed, Some(&err.to_string()))
                    .await;
                return;
            }
        };

        if let Some(warning) = &outcome.push_warning {
            tracing::warn!(%instance_id, %warning, "registry push degraded to warning");
        }

        if let Err(err) = self.write_build_logs(&instance_id, &outcome.logs).await {
            tracing::error!(%instance_id, error = %err, "failed to persist build logs");
        }

        if let Err(err) = self
            .tracker
            .set_state(&instance_id, BuildState::Deploying, None)
            .await
        {
            tracing::error!(%instance_id, error = %err, "failed to mark build as deploying");
            return;
        }

        let pull_image = self.resolve_pull_image(&outcome.image);

        let deploy_result = async {
            self.ensure_shared_claim(&user_id, resources.shared_storage_size())
                .await?;
            self.write_config_record(
                &instance_id,
                &user_id,
                &token,
                &resources,
                Some(&pull_image),
                &customization,
            )
            .await?;
            self.create_workload_triple(
                &instance_id,
                &user_id,
                &resources,
                &outcome.image,
                &token,
                &customization,
            )
            .await
        }
        .await;

        match deploy_result {
            Ok(()) => {
                let _ = self
                    .tracker
                    .set_state(&instance_id, BuildState::Completed, None)
                    .await;
                let tracker_gateway = self.gateway.clone();
                let id_for_cleanup = instance_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(TRACKER_GRACE_PERIOD).await;
                    let name = object_name(ObjectKind::BuildStatus, &id_for_cleanup, "");
                    let _ = tracker_gateway.delete_config(&name).await;
                });
            }
            Err(err) => {
                let _ = self
                    .tracker
                    .set_state(&instance_id, BuildState::Failed, Some(&err.to_string()))
                    .await;
            }
        }
    }

    pub async fn status(&self, instance_id: &str) -> Result<InstanceStatus, Error> {
        match self.gateway.workload_status(instance_id).await? {
            WorkloadStatus::Running => Ok(InstanceStatus::Running),
            WorkloadStatus::Pending => Ok(InstanceStatus::Pending),
            WorkloadStatus::NotFound => Err(Error::from_kind(ErrorKind::NotFound)),
        }
    }

    /// Deletes every object for an instance in reverse creation order,
    /// tolerating each step already being absent. The user's shared claim
    /// outlives its owner's instances and is never touched here.
    pub async fn delete(&self, instance_id: &str, user_id: &str) -> Result<(), Error> {
        let ingress = object_name(ObjectKind::Ingress, instance_id, user_id);
        let service = object_name(ObjectKind::Service, instance_id, user_id);
        let config = object_name(ObjectKind::Config, instance_id, user_id);
        let build_logs = object_name(ObjectKind::BuildLogs, instance_id, user_id);
        let workspace = object_name(ObjectKind::WorkspaceVolume, instance_id, user_id);

        self.gateway.delete_ingress(&ingress).await?;
        self.gateway.delete_service(&service).await?;
        self.gateway.delete_workload(instance_id).await?;
        self.gateway.delete_config(&config).await?;
        self.gateway.delete_config(&build_logs).await?;
        self.gateway.delete_volume_claim(&workspace).await?;
        Ok(())
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn tracker(&self) -> &BuildTracker<G> {
        &self.tracker
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

    fn coordinator() -> Coordinator<FakeOrchestrator> {
        let gateway = FakeOrchestrator::new();
        let builder = ImageBuilder::new(
            "tcp://localhost:2375".to_string(),
            "localhost:32000".to_string(),
            "localhost:32000".to_string(),
        );
        Coordinator::new(
            gateway,
            builder,
            "vscode.local".to_string(),
            "localhost:32000".to_string(),
            "localhost:32000".to_string(),
        )
    }

    #[tokio::test]
    async fn create_simple_produces_creating_status_and_url() {
        let coordinator = coordinator();
        let summary = coordinator.create_simple("carol", resources()).await.unwrap();
        assert_eq!(summary.status, InstanceStatus::Creating);
        assert!(summary.url.starts_with("https://vscode.local/instances/carol-"));
        assert!(summary.url.contains("?tkn="));
        assert!(summary.instance_id.starts_with("carol-"));
    }

    #[tokio::test]
    async fn delete_tolerates_instance_never_having_existed() {
        let coordinator = coordinator();
        coordinator.delete("ghost-00000000", "ghost").await.unwrap();
    }

    #[tokio::test]
    async fn status_of_unknown_instance_is_not_found() {
        let coordinator = coordinator();
        let err = coordinator.status("ghost-00000000").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn start_build_create_writes_queued_tracker() {
        let coordinator = coordinator();
        let (summary, _token) = coordinator
            .start_build_create("dave", resources())
            .await
            .unwrap();
        assert_eq!(summary.status, InstanceStatus::Queued);

        let status = coordinator.tracker().read(&summary.instance_id).await.unwrap();
        assert_eq!(status.status, BuildState::Queued);
    }

    #[tokio::test]
    async fn run_build_job_fails_in_background_when_workspace_has_no_devcontainer() {
        let coordinator = Arc::new(coordinator());
        let (summary, token) = coordinator
            .start_build_create("erin", resources())
            .await
            .unwrap();

        let workspace_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(workspace_dir.path().join("main.rs"), b"fn main() {}").unwrap();

        coordinator
            .clone()
            .run_build_job(
                summary.instance_id.clone(),
                "erin".to_string(),
                token,
                resources(),
                workspace_dir.path().to_path_buf(),
                None,
                VsCodeCustomization::default(),
                true,
            )
            .await;

        let status = coordinator.tracker().read(&summary.instance_id).await.unwrap();
        assert_eq!(status.status, BuildState::Failed);
        assert!(status.error.unwrap().contains("devcontainer"));
    }

    #[tokio::test]
    async fn resolve_pull_image_rewrites_only_when_registries_differ() {
        let same = coordinator();
        assert_eq!(
            same.resolve_pull_image("localhost:32000/vscode-devcontainer-x:latest"),
            "localhost:32000/vscode-devcontainer-x:latest"
        );

        let gateway = FakeOrchestrator::new();
        let builder = ImageBuilder::new(
            "tcp://localhost:2375".to_string(),
            "10.0.0.5:32000".to_string(),
            "localhost:32000".to_string(),
        );
        let differing = Coordinator::new(
            gateway,
            builder,
            "vscode.local".to_string(),
            "10.0.0.5:32000".to_string(),
            "localhost:32000".to_string(),
        );
        assert_eq!(
            differing.resolve_pull_image("10.0.0.5:32000/vscode-devcontainer-x:latest"),
            "localhost:32000/vscode-devcontainer-x:latest"
        );
    }
}
