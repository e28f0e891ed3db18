//! The public HTTP API surface: request/response shapes and the axum
//! handlers and router that implement the endpoint table.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Extension, Multipart, Path as AxumPath};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

use crate::builder::DevcontainerConfig;
use crate::coordinator::{customization_from_devcontainer, InstanceSummary, ResourceRequest, VsCodeCustomization};
use crate::orchestrator::OrchestratorGateway;
use crate::service::GatewayService;
use crate::tracker::BuildState;
use crate::{Error, ErrorKind};

const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub struct VscodeServerRequest {
    pub user_id: String,
    pub storage_size: Option<String>,
    pub shared_storage_size: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub base_image: Option<String>,
    pub vscode_version: Option<String>,
}

impl VscodeServerRequest {
    fn into_resources(self) -> (String, ResourceRequest) {
        (
            self.user_id,
            ResourceRequest {
                storage_size: self.storage_size,
                shared_storage_size: self.shared_storage_size,
                memory_request: self.memory_request,
                memory_limit: self.memory_limit,
                cpu_request: self.cpu_request,
                cpu_limit: self.cpu_limit,
                base_image: self.base_image,
                vscode_version: self.vscode_version,
            },
        )
    }
}

/// Matches `^[A-Za-z0-9][-A-Za-z0-9_./:]*$` without pulling in a regex
/// engine for one anchored character class.
fn validate_base_image(image: &str) -> Result<(), Error> {
    let mut chars = image.bytes();
    let valid_rest = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':');

    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => {
            return Err(Error::custom(
                ErrorKind::InvalidRequest,
                "base_image must start with an alphanumeric character",
            ))
        }
    }
    if !image.bytes().skip(1).all(valid_rest) {
        return Err(Error::custom(
            ErrorKind::InvalidRequest,
            "base_image contains characters not valid in an image reference",
        ));
    }
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "vscode-gateway",
        "version": CRATE_VERSION,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "vscode-gateway" }))
}

async fn create_simple<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    Json(request): Json<VscodeServerRequest>,
) -> Result<(StatusCode, Json<InstanceSummary>), Error> {
    let (user_id, resources) = request.into_resources();
    validate_base_image(resources.base_image.as_deref().unwrap_or(crate::coordinator::DEFAULT_BASE_IMAGE))?;
    let summary = service.create_simple(&user_id, resources).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Shared multipart parsing for the two build-backed create endpoints:
/// extracts `user_id`, the optional resource fields, and the named upload
/// field, returning the raw bytes of that field alongside the parsed
/// resource request.
async fn parse_build_multipart(
    mut multipart: Multipart,
    file_field: &str,
) -> Result<(String, ResourceRequest, Vec<u8>), Error> {
    let mut user_id = None;
    let mut resources = ResourceRequest {
        storage_size: None,
        shared_storage_size: None,
        memory_request: None,
        memory_limit: None,
        cpu_request: None,
        cpu_limit: None,
        base_image: None,
        vscode_version: None,
    };
    let mut file_bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| Error::custom(ErrorKind::InvalidRequest, err.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == file_field {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| Error::custom(ErrorKind::InvalidRequest, err.to_string()))?;
            file_bytes = Some(bytes.to_vec());
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|err| Error::custom(ErrorKind::InvalidRequest, err.to_string()))?;
        match name.as_str() {
            "user_id" => user_id = Some(text),
            "storage_size" => resources.storage_size = Some(text),
            "shared_storage_size" => resources.shared_storage_size = Some(text),
            "memory_request" => resources.memory_request = Some(text),
            "memory_limit" => resources.memory_limit = Some(text),
            "cpu_request" => resources.cpu_request = Some(text),
            "cpu_limit" => resources.cpu_limit = Some(text),
            "base_image" => resources.base_image = Some(text),
            "vscode_version" => resources.vscode_version = Some(text),
            _ => {}
        }
    }

    let user_id = user_id.ok_or_else(|| {
        Error::custom(ErrorKind::InvalidRequest, "missing required field user_id")
    })?;
    let file_bytes = file_bytes.ok_or_else(|| {
        Error::custom(
            ErrorKind::InvalidRequest,
            format!("missing required field {file_field}"),
        )
    })?;

    if let Some(base_image) = &resources.base_image {
        validate_base_image(base_image)?;
    }

    Ok((user_id, resources, file_bytes))
}

async fn create_devcontainer<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<InstanceSummary>), Error> {
    let (user_id, resources, json_bytes) =
        parse_build_multipart(multipart, "devcontainer_json").await?;

    let devcontainer: serde_json::Value = serde_json::from_slice(&json_bytes)
        .map_err(|err| Error::custom(ErrorKind::InvalidRequest, format!("invalid devcontainer.json: {err}")))?;
    let customization = customization_from_devcontainer(&devcontainer);

    let workspace_dir = TempDir::new().map_err(Error::from)?;
    let workspace_path = workspace_dir.path().to_path_buf();
    let summary = service
        .create_build_backed(
            &user_id,
            resources,
            workspace_path,
            Some(workspace_dir),
            Some(DevcontainerConfig(devcontainer)),
            customization,
            false,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Extracts the uploaded archive and hands the raw workspace directory
/// straight to the background build job, which searches it for a
/// `devcontainer.json` once the build starts. A missing file fails the
/// build asynchronously (`queued` -> `building` -> `failed`) rather than
/// rejecting the upload synchronously, so a well-formed but
/// devcontainer-less archive still goes through the normal queued flow.
async fn create_workspace<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<InstanceSummary>), Error> {
    let (user_id, resources, archive_bytes) = parse_build_multipart(multipart, "workspace").await?;

    let workspace_dir = TempDir::new().map_err(Error::from)?;
    extract_workspace_archive(&archive_bytes, workspace_dir.path())?;
    let workspace_path = workspace_dir.path().to_path_buf();

    let summary = service
        .create_build_backed(
            &user_id,
            resources,
            workspace_path,
            Some(workspace_dir),
            None,
            VsCodeCustomization::default(),
            true,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Decompresses and unpacks a gzip-compressed tar archive into `dest`.
fn extract_workspace_archive(bytes: &[u8], dest: &Path) -> Result<(), Error> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest).map_err(|err| {
        Error::custom(
            ErrorKind::InvalidRequest,
            format!("uploaded workspace is not a valid gzip-compressed tar archive: {err}"),
        )
    })
}

async fn get_instance<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    AxumPath(instance_id): AxumPath<String>,
) -> Result<Json<InstanceSummary>, Error> {
    let user_id = crate::naming::user_id_from_instance(&instance_id)
        .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
    let summary = service.get(&instance_id, user_id).await?;
    Ok(Json(summary))
}

#[derive(Serialize)]
struct BuildStatusResponse {
    instance_id: String,
    status: BuildState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn get_build_status<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    AxumPath(instance_id): AxumPath<String>,
) -> Result<Json<BuildStatusResponse>, Error> {
    let status = service.build_status(&instance_id).await?;
    Ok(Json(BuildStatusResponse {
        instance_id: status.instance_id,
        status: status.status,
        error: status.error,
    }))
}

#[derive(Serialize)]
struct BuildLogsResponse {
    instance_id: String,
    status: BuildState,
    logs: Vec<String>,
}

async fn get_build_logs<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    AxumPath(instance_id): AxumPath<String>,
) -> Result<Json<BuildLogsResponse>, Error> {
    let (status, logs) = service.build_logs(&instance_id).await?;
    Ok(Json(BuildLogsResponse {
        instance_id,
        status,
        logs,
    }))
}

async fn delete_instance<G: OrchestratorGateway + 'static>(
    Extension(service): Extension<Arc<GatewayService<G>>>,
    AxumPath(instance_id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let user_id = crate::naming::user_id_from_instance(&instance_id)
        .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
    service.delete(&instance_id, user_id).await?;
    Ok(Json(json!({ "instance_id": instance_id, "status": "Deleted" })))
}

pub fn make_api<G: OrchestratorGateway + 'static>(service: Arc<GatewayService<G>>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/instances/simple", post(create_simple::<G>))
        .route("/instances/devcontainer", post(create_devcontainer::<G>))
        .route("/instances/workspace", post(create_workspace::<G>))
        .route("/instances/:id", get(get_instance::<G>).delete(delete_instance::<G>))
        .route("/instances/:id/build-status", get(get_build_status::<G>))
        .route("/instances/:id/build-logs", get(get_build_logs::<G>))
        .layer(Extension(service))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::orchestrator::FakeOrchestrator;

    fn app() -> Router {
        let service = Arc::new(GatewayService::new(
            FakeOrchestrator::new(),
            "tcp://localhost:2375".to_string(),
            "localhost:32000".to_string(),
            "localhost:32000".to_string(),
            "vscode.local".to_string(),
        ));
        make_api(service)
    }

    #[tokio::test]
    async fn simple_create_then_get_then_delete_then_404() {
        let app = app();

        let create = Request::builder()
            .method("POST")
            .uri("/instances/simple")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"user_id":"alice","base_image":"ubuntu:22.04"}"#))
            .unwrap();
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let summary: InstanceSummary = serde_json::from_slice(&body).unwrap();
        assert!(summary.instance_id.starts_with("alice-"));
        assert_eq!(summary.status.to_string(), "Creating");

        let get = Request::builder()
            .uri(format!("/instances/{}", summary.instance_id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/instances/{}", summary.instance_id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let get_again = Request::builder()
            .uri(format!("/instances/{}", summary.instance_id))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(get_again).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn simple_create_rejects_invalid_base_image() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/instances/simple")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"user_id":"bob","base_image":"-bad image"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_root_are_unauthenticated() {
        let app = app();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn base_image_validation_matches_spec_pattern() {
        assert!(validate_base_image("ubuntu:22.04").is_ok());
        assert!(validate_base_image("ghcr.io/foo/bar:latest").is_ok());
        assert!(validate_base_image("-bad image").is_err());
        assert!(validate_base_image("").is_err());
    }
}
