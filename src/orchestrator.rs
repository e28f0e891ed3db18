//! The Orchestrator Gateway: a thin typed facade over the cluster API,
//! exposing exactly the object kinds the Instance Lifecycle Coordinator
//! needs. All retries, not-found mapping and conflict handling live here so
//! the rest of the service never matches on transport-level error types.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, EnvFromSource, EnvVar, EmptyDirVolumeSource,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Service as K8sService,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::naming::{object_name, ObjectKind};

pub const APP_LABEL: &str = "vscode-server";
const TLS_SECRET_NAME: &str = "vscode-server-tls";

#[derive(thiserror::Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("upstream error, retry may succeed: {0}")]
    Transient(String),
    #[error("unrecoverable upstream error: {0}")]
    Fatal(String),
}

impl From<kube::Error> for OrchestratorError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => OrchestratorError::NotFound,
            kube::Error::Api(resp) if resp.code == 409 => OrchestratorError::AlreadyExists,
            kube::Error::Api(resp) if resp.code >= 500 => {
                OrchestratorError::Transient(resp.message.clone())
            }
            other => OrchestratorError::Fatal(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for crate::Error {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound => crate::ErrorKind::NotFound.into(),
            OrchestratorError::AlreadyExists => crate::ErrorKind::Internal.into(),
            OrchestratorError::Transient(_) | OrchestratorError::Fatal(_) => {
                crate::Error::source(crate::ErrorKind::UpstreamTransient, err)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadStatus {
    Running,
    Pending,
    NotFound,
}

/// Everything the Session Template needs materialized into a workload.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub instance_id: String,
    pub user_id: String,
    pub image: String,
    pub launch_script: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub cpu_request: String,
    pub cpu_limit: String,
}

/// Operations exposed: analogous create/read/patch/delete triples per object
/// kind. `ensure_*` is idempotent: on `AlreadyExists` it returns the existing
/// object rather than erroring. The gateway holds no cache; every call hits
/// the cluster.
#[async_trait]
pub trait OrchestratorGateway: Send + Sync {
    async fn ensure_config(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigRecord, OrchestratorError>;
    async fn read_config(&self, name: &str) -> Result<ConfigRecord, OrchestratorError>;
    async fn patch_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), OrchestratorError>;
    async fn delete_config(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn ensure_volume_claim(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        size: &str,
    ) -> Result<(), OrchestratorError>;
    async fn delete_volume_claim(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError>;
    async fn workload_status(&self, name: &str) -> Result<WorkloadStatus, OrchestratorError>;
    async fn delete_workload(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn create_service(&self, instance_id: &str) -> Result<(), OrchestratorError>;
    async fn delete_service(&self, name: &str) -> Result<(), OrchestratorError>;

    async fn create_ingress(
        &self,
        instance_id: &str,
        base_domain: &str,
    ) -> Result<(), OrchestratorError>;
    async fn delete_ingress(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Internal IP of a cluster node, used to resolve the push-side registry
    /// address when it differs from the address pods pull from.
    async fn node_internal_ip(&self) -> Result<Option<String>, OrchestratorError>;
}

/// Real implementation, backed by a live cluster via `kube`.
pub struct KubeOrchestrator {
    namespace: String,
    client: Client,
}

impl KubeOrchestrator {
    pub async fn new(namespace: String) -> Result<Self, OrchestratorError> {
        let client = Client::try_default()
            .await
            .map_err(|err| OrchestratorError::Fatal(err.to_string()))?;
        Ok(Self { namespace, client })
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<K8sService> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn ingresses(&self) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl OrchestratorGateway for KubeOrchestrator {
    async fn ensure_config(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigRecord, OrchestratorError> {
        let api = self.config_maps();
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.into_iter().collect()),
                ..Default::default()
            },
            data: Some(data.clone().into_iter().collect()),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => {
                info!(name, "created config record");
                Ok(ConfigRecord {
                    name: name.to_string(),
                    data,
                })
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => self.read_config(name).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn read_config(&self, name: &str) -> Result<ConfigRecord, OrchestratorError> {
        let cm = self.config_maps().get(name).await?;
        Ok(ConfigRecord {
            name: name.to_string(),
            data: cm.data.unwrap_or_default().into_iter().collect(),
        })
    }

    async fn patch_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        let patch = json!({ "data": data });
        self.config_maps()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_config(&self, name: &str) -> Result<(), OrchestratorError> {
        match self.config_maps().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_volume_claim(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        size: &str,
    ) -> Result<(), OrchestratorError> {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.into_iter().collect()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(ResourceRequirements {
                    requests: Some(
                        [("storage".to_string(), Quantity(size.to_string()))]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.claims().create(&PostParams::default(), &pvc).await {
            Ok(_) => {
                debug!(name, "created volume claim");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_volume_claim(&self, name: &str) -> Result<(), OrchestratorError> {
        match self.claims().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError> {
        let labels: BTreeMap<String, String> = [
            ("app".to_string(), APP_LABEL.to_string()),
            ("instance".to_string(), spec.instance_id.clone()),
            ("user".to_string(), spec.user_id.clone()),
        ]
        .into_iter()
        .collect();

        let shared_claim = object_name(ObjectKind::SharedVolume, &spec.instance_id, &spec.user_id);
        let workspace_claim =
            object_name(ObjectKind::WorkspaceVolume, &spec.instance_id, &spec.user_id);
        let config_name = object_name(ObjectKind::Config, &spec.instance_id, &spec.user_id);

        let container = Container {
            name: APP_LABEL.to_string(),
            image: Some(spec.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
            args: Some(vec![spec.launch_script.clone()]),
            env_from: Some(vec![EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: Some(config_name),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            env: Some(vec![EnvVar {
                name: "HOME".to_string(),
                value: Some("/home/vscode".to_string()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: "workspace".to_string(),
                    mount_path: "/workspace".to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    name: "shared".to_string(),
                    mount_path: "/shared".to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    name: "vscode-config".to_string(),
                    mount_path: "/home/vscode/.vscode".to_string(),
                    ..Default::default()
                },
            ]),
            resources: Some(ResourceRequirements {
                requests: Some(
                    [
                        ("memory".to_string(), Quantity(spec.memory_request.clone())),
                        ("cpu".to_string(), Quantity(spec.cpu_request.clone())),
                    ]
                    .into_iter()
                    .collect(),
                ),
                limits: Some(
                    [
                        ("memory".to_string(), Quantity(spec.memory_limit.clone())),
                        ("cpu".to_string(), Quantity(spec.cpu_limit.clone())),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            }),
            security_context: Some(SecurityContext {
                run_as_user: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(spec.instance_id.clone()),
                labels: Some(labels.clone().into_iter().collect()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(
                        [
                            ("app".to_string(), APP_LABEL.to_string()),
                            ("instance".to_string(), spec.instance_id.clone()),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.into_iter().collect()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(vec![
                            Volume {
                                name: "workspace".to_string(),
                                persistent_volume_claim: Some(
                                    PersistentVolumeClaimVolumeSource {
                                        claim_name: workspace_claim,
                                        ..Default::default()
                                    },
                                ),
                                ..Default::default()
                            },
                            Volume {
                                name: "shared".to_string(),
                                persistent_volume_claim: Some(
                                    PersistentVolumeClaimVolumeSource {
                                        claim_name: shared_claim,
                                        ..Default::default()
                                    },
                                ),
                                ..Default::default()
                            },
                            Volume {
                                name: "vscode-config".to_string(),
                                empty_dir: Some(EmptyDirVolumeSource::default()),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        match self
            .deployments()
            .create(&PostParams::default(), &deployment)
            .await
        {
            Ok(_) => {
                info!(instance = %spec.instance_id, "created workload");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn workload_status(&self, name: &str) -> Result<WorkloadStatus, OrchestratorError> {
        match self.deployments().get_status(name).await {
            Ok(deployment) => {
                let available = deployment
                    .status
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0);
                Ok(if available > 0 {
                    WorkloadStatus::Running
                } else {
                    WorkloadStatus::Pending
                })
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(WorkloadStatus::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_workload(&self, name: &str) -> Result<(), OrchestratorError> {
        match self.deployments().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_service(&self, instance_id: &str) -> Result<(), OrchestratorError> {
        let name = object_name(ObjectKind::Service, instance_id, "");
        let service = K8sService {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [
                        ("app".to_string(), APP_LABEL.to_string()),
                        ("instance".to_string(), instance_id.to_string()),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(
                    [
                        ("app".to_string(), APP_LABEL.to_string()),
                        ("instance".to_string(), instance_id.to_string()),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ports: Some(vec![ServicePort {
                    port: 8000,
                    target_port: Some(
                        k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(8000),
                    ),
                    ..Default::default()
                }]),
                type_: Some("ClusterIP".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.services().create(&PostParams::default(), &service).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_service(&self, name: &str) -> Result<(), OrchestratorError> {
        match self.services().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_ingress(
        &self,
        instance_id: &str,
        base_domain: &str,
    ) -> Result<(), OrchestratorError> {
        let name = object_name(ObjectKind::Ingress, instance_id, "");
        let service_name = object_name(ObjectKind::Service, instance_id, "");
        let path = crate::naming::instance_path(instance_id);

        let ingress: Ingress = serde_json::from_value(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {
                "name": name,
                "labels": { "app": APP_LABEL, "instance": instance_id },
                "annotations": {
                    "nginx.ingress.kubernetes.io/backend-protocol": "HTTP",
                    "nginx.ingress.kubernetes.io/proxy-read-timeout": "3600",
                    "nginx.ingress.kubernetes.io/proxy-send-timeout": "3600",
                    "nginx.ingress.kubernetes.io/proxy-body-size": "0",
                    "nginx.ingress.kubernetes.io/proxy-buffer-size": "128k",
                    "nginx.ingress.kubernetes.io/proxy-http-version": "1.1",
                    "nginx.ingress.kubernetes.io/websocket-services": service_name,
                    "nginx.ingress.kubernetes.io/upstream-vhost": base_domain,
                }
            },
            "spec": {
                "tls": [{ "hosts": [base_domain], "secretName": TLS_SECRET_NAME }],
                "rules": [{
                    "host": base_domain,
                    "http": {
                        "paths": [{
                            "path": path,
                            "pathType": "Prefix",
                            "backend": {
                                "service": { "name": service_name, "port": { "number": 8000 } }
                            }
                        }]
                    }
                }]
            }
        }))
        .map_err(|err| OrchestratorError::Fatal(err.to_string()))?;

        match self.ingresses().create(&PostParams::default(), &ingress).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_ingress(&self, name: &str) -> Result<(), OrchestratorError> {
        match self.ingresses().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn node_internal_ip(&self) -> Result<Option<String>, OrchestratorError> {
        let nodes: Api<k8s_openapi::api::core::v1::Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .first()
            .and_then(|node| node.status.as_ref())
            .and_then(|status| status.addresses.as_ref())
            .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
            .map(|a| a.address.clone()))
    }
}

/// In-memory stand-in used by tests, so the Coordinator and API layer can be
/// exercised without a real cluster. Mirrors exactly the semantics of
/// [`KubeOrchestrator`]: `NotFound` on missing reads/deletes-of-nothing,
/// idempotent `ensure_*`.
#[derive(Default)]
pub struct FakeOrchestrator {
    configs: Mutex<HashMap<String, ConfigRecord>>,
    claims: Mutex<HashMap<String, String>>,
    workloads: Mutex<HashMap<String, WorkloadStatus>>,
    services: Mutex<HashMap<String, ()>>,
    ingresses: Mutex<HashMap<String, ()>>,
}

impl FakeOrchestrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test hook: flip a created workload to `Running`, as a real scheduler
    /// eventually would once the pod becomes ready.
    pub async fn mark_workload_running(&self, name: &str) {
        if let Some(status) = self.workloads.lock().await.get_mut(name) {
            *status = WorkloadStatus::Running;
        }
    }
}

#[async_trait]
impl OrchestratorGateway for FakeOrchestrator {
    async fn ensure_config(
        &self,
        name: &str,
        _labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<ConfigRecord, OrchestratorError> {
        let mut configs = self.configs.lock().await;
        if let Some(existing) = configs.get(name) {
            return Ok(existing.clone());
        }
        let record = ConfigRecord {
            name: name.to_string(),
            data,
        };
        configs.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn read_config(&self, name: &str) -> Result<ConfigRecord, OrchestratorError> {
        self.configs
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or(OrchestratorError::NotFound)
    }

    async fn patch_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        let mut configs = self.configs.lock().await;
        let record = configs.get_mut(name).ok_or(OrchestratorError::NotFound)?;
        record.data.extend(data);
        Ok(())
    }

    async fn delete_config(&self, name: &str) -> Result<(), OrchestratorError> {
        self.configs.lock().await.remove(name);
        Ok(())
    }

    async fn ensure_volume_claim(
        &self,
        name: &str,
        _labels: BTreeMap<String, String>,
        size: &str,
    ) -> Result<(), OrchestratorError> {
        self.claims
            .lock()
            .await
            .entry(name.to_string())
            .or_insert_with(|| size.to_string());
        Ok(())
    }

    async fn delete_volume_claim(&self, name: &str) -> Result<(), OrchestratorError> {
        self.claims.lock().await.remove(name);
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), OrchestratorError> {
        self.workloads
            .lock()
            .await
            .insert(spec.instance_id.clone(), WorkloadStatus::Pending);
        Ok(())
    }

    async fn workload_status(&self, name: &str) -> Result<WorkloadStatus, OrchestratorError> {
        Ok(self
            .workloads
            .lock()
            .await
            .get(name)
            .copied()
            .unwrap_or(WorkloadStatus::NotFound))
    }

    async fn delete_workload(&self, name: &str) -> Result<(), OrchestratorError> {
        self.workloads.lock().await.remove(name);
        Ok(())
    }

    async fn create_service(&self, instance_id: &str) -> Result<(), OrchestratorError> {
        let name = object_name(ObjectKind::Service, instance_id, "");
        self.services.lock().await.insert(name, ());
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), OrchestratorError> {
        self.services.lock().await.remove(name);
        Ok(())
    }

    async fn create_ingress(
        &self,
        instance_id: &str,
        _base_domain: &str,
    ) -> Result<(), OrchestratorError> {
        let name = object_name(ObjectKind::Ingress, instance_id, "");
        self.ingresses.lock().await.insert(name, ());
        Ok(())
    }

    async fn delete_ingress(&self, name: &str) -> Result<(), OrchestratorError> {
        self.ingresses.lock().await.remove(name);
        Ok(())
    }

    async fn node_internal_ip(&self) -> Result<Option<String>, OrchestratorError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_config_is_idempotent() {
        let gw = FakeOrchestrator::new();
        let data: BTreeMap<_, _> = [("TOKEN".to_string(), "abc".to_string())].into_iter().collect();
        let first = gw.ensure_config("x-config", BTreeMap::new(), data.clone()).await.unwrap();
        let second = gw
            .ensure_config("x-config", BTreeMap::new(), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn read_missing_config_is_not_found() {
        let gw = FakeOrchestrator::new();
        let err = gw.read_config("missing").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_tolerant_of_missing_objects() {
        let gw = FakeOrchestrator::new();
        gw.delete_config("missing").await.unwrap();
        gw.delete_workload("missing").await.unwrap();
        gw.delete_service("missing").await.unwrap();
        gw.delete_ingress("missing").await.unwrap();
    }

    #[tokio::test]
    async fn workload_status_defaults_to_not_found() {
        let gw = FakeOrchestrator::new();
        assert_eq!(
            gw.workload_status("nope").await.unwrap(),
            WorkloadStatus::NotFound
        );
    }
}
