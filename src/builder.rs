//! Image Builder: turns a workspace directory containing a `.devcontainer`
//! into a pushed (or, in the last-resort case, locally available) image.
//!
//! Every step shells out to the `devcontainer` and `docker` CLIs rather than
//! talking to the engine over its API; this mirrors how the reference
//! control plane drove the container engine, and keeps the builder honest
//! about exactly what a human operator would see if they ran the same
//! commands by hand.

use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::{Error, ErrorKind};

/// Image pushed (or left local) by a build, plus everything the Build Logs
/// Record needs.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub image: String,
    pub logs: Vec<String>,
    /// Set when every push strategy failed and the builder fell back to the
    /// image it built locally; the build itself still succeeded.
    pub push_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevcontainerConfig(pub serde_json::Value);

pub struct ImageBuilder {
    docker_host: String,
    registry: String,
    /// Address to retag and retry a push against when the primary `registry`
    /// push fails — the other half of the registry dual-address resolution
    /// (the Coordinator's pull-reachable address, passed in here as a
    /// fallback push target).
    fallback_registry: String,
}

impl ImageBuilder {
    pub fn new(docker_host: String, registry: String, fallback_registry: String) -> Self {
        Self {
            docker_host,
            registry,
            fallback_registry,
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![("DOCKER_HOST".to_string(), self.docker_host.clone())]
    }

    /// Fails fast if the configured engine cannot be reached at all, rather
    /// than letting the eventual `devcontainer build` invocation produce a
    /// confusing low-level error.
    async fn probe_docker(&self) -> Result<(), Error> {
        let output = Command::new("docker")
            .arg("version")
            .envs(self.env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| Error::source(ErrorKind::UpstreamTransient, err))?;

        if !output.status.success() {
            return Err(Error::custom(
                ErrorKind::UpstreamTransient,
                "container engine is not reachable",
            ));
        }
        Ok(())
    }

    /// Writes `config` as `<workspace>/.devcontainer/devcontainer.json` when
    /// the caller supplied one explicitly (the devcontainer-JSON creation
    /// path); a workspace archive that already carries its own
    /// `.devcontainer` is left untouched.
    async fn write_devcontainer_config(
        &self,
        workspace_dir: &Path,
        config: &DevcontainerConfig,
    ) -> Result<(), Error> {
        let dir = workspace_dir.join(".devcontainer");
        tokio::fs::create_dir_all(&dir).await?;
        let body = serde_json::to_vec_pretty(&config.0)
            .map_err(|err| Error::source(ErrorKind::InvalidRequest, err))?;
        tokio::fs::write(dir.join("devcontainer.json"), body).await?;
        Ok(())
    }

    async fn run_streaming(
        &self,
        mut command: Command,
        logs: &mut Vec<String>,
        log_prefix: &str,
    ) -> Result<bool, Error> {
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(self.env());

        let mut child = command
            .spawn()
            .map_err(|err| Error::source(ErrorKind::Internal, err))?;
        let stdout = child.stdout.take().expect("stdout piped");
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| Error::source(ErrorKind::Internal, err))?
        {
            tracing::debug!(%log_prefix, %line, "build output");
            logs.push(line);
        }

        let status = child
            .wait()
            .await
            .map_err(|err| Error::source(ErrorKind::Internal, err))?;
        Ok(status.success())
    }

    /// Builds the image in `workspace_dir`, optionally seeding a
    /// `devcontainer.json` first, then attempts to push it to the configured
    /// registry. A push failure never fails the build: the image that was
    /// built locally is returned with `push_warning` set, so the caller can
    /// fall back to the registry's node-local pull address.
    pub async fn build(
        &self,
        instance_id: &str,
        workspace_dir: &Path,
        config: Option<&DevcontainerConfig>,
    ) -> Result<BuildOutcome, Error> {
        self.probe_docker().await?;

        if let Some(config) = config {
            self.write_devcontainer_config(workspace_dir, config).await?;
        }

        let push_image_name = format!("{}/vscode-devcontainer-{instance_id}:latest", self.registry);

        let mut logs = Vec::new();
        let mut build_cmd = Command::new("devcontainer");
        build_cmd
            .arg("build")
            .arg("--workspace-folder")
            .arg(workspace_dir)
            .arg("--image-name")
            .arg(&push_image_name)
            .arg("--no-cache");

        let built = self.run_streaming(build_cmd, &mut logs, "build").await?;
        if !built {
            return Err(Error::custom(
                ErrorKind::Internal,
                format!("devcontainer build failed for {instance_id}"),
            ));
        }

        let mut push_cmd = Command::new("docker");
        push_cmd.arg("push").arg(&push_image_name);
        let pushed = self.run_streaming(push_cmd, &mut logs, "push").await?;

        if pushed {
            return Ok(BuildOutcome {
                image: push_image_name,
                logs,
                push_warning: None,
            });
        }

        if self.fallback_registry != self.registry {
            let retag_name = push_image_name.replacen(&self.registry, &self.fallback_registry, 1);
            let mut tag_cmd = Command::new("docker");
            tag_cmd.arg("tag").arg(&push_image_name).arg(&retag_name);
            let retagged = self.run_streaming(tag_cmd, &mut logs, "tag").await?;

            if retagged {
                let mut retry_push = Command::new("docker");
                retry_push.arg("push").arg(&retag_name);
                if self.run_streaming(retry_push, &mut logs, "push").await? {
                    return Ok(BuildOutcome {
                        image: retag_name,
                        logs,
                        push_warning: None,
                    });
                }
            }
        }

        let warning = format!(
            "failed to push {push_image_name} to registry after retrying; using local image"
        );
        logs.push(format!("WARNING: {warning}"));
        Ok(BuildOutcome {
            image: push_image_name,
            logs,
            push_warning: Some(warning),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_image_name_follows_convention() {
        let builder = ImageBuilder::new(
            "tcp://localhost:2375".to_string(),
            "10.0.0.5:32000".to_string(),
            "localhost:32000".to_string(),
        );
        let name = format!("{}/vscode-devcontainer-{}:latest", builder.registry, "alice-abc12345");
        assert_eq!(name, "10.0.0.5:32000/vscode-devcontainer-alice-abc12345:latest");
    }

    #[test]
    fn retag_only_replaces_primary_registry_prefix() {
        let original = "10.0.0.5:32000/vscode-devcontainer-alice-abc12345:latest".to_string();
        let retagged = original.replacen("10.0.0.5:32000", "localhost:32000", 1);
        assert_eq!(
            retagged,
            "localhost:32000/vscode-devcontainer-alice-abc12345:latest"
        );
    }
}
