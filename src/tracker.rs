//! Build Job Tracker: the small orchestrator-visible record that makes an
//! asynchronous build observable without the service keeping any state of
//! its own. Transitions are enforced by the caller, not here — the tracker
//! only ever writes whatever state it is told to.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::naming::{object_name, ObjectKind};
use crate::orchestrator::{OrchestratorError, OrchestratorGateway};
use crate::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Queued,
    Building,
    Deploying,
    Completed,
    Failed,
}

impl BuildState {
    fn is_terminal(self) -> bool {
        matches!(self, BuildState::Completed | BuildState::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildStatus {
    pub instance_id: String,
    pub status: BuildState,
    pub error: Option<String>,
}

pub struct BuildTracker<G: OrchestratorGateway> {
    gateway: Arc<G>,
}

impl<G: OrchestratorGateway> BuildTracker<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Creates the `queued` tracker record, embedding whatever parameters the
    /// background job will need to resume (image request, resource sizes,
    /// devcontainer customizations). Called synchronously before the POST
    /// that started the build returns.
    pub async fn start(
        &self,
        instance_id: &str,
        initial_data: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let name = object_name(ObjectKind::BuildStatus, instance_id, "");
        let mut data = initial_data;
        data.insert("state".to_string(), BuildState::Queued.to_string());

        let labels: BTreeMap<String, String> = [
            ("app".to_string(), crate::orchestrator::APP_LABEL.to_string()),
            ("instance".to_string(), instance_id.to_string()),
        ]
        .into_iter()
        .collect();

        self.gateway.ensure_config(&name, labels, data).await?;
        Ok(())
    }

    pub async fn set_state(
        &self,
        instance_id: &str,
        state: BuildState,
        error: Option<&str>,
    ) -> Result<(), Error> {
        let name = object_name(ObjectKind::BuildStatus, instance_id, "");
        let mut patch = BTreeMap::new();
        patch.insert("state".to_string(), state.to_string());
        if let Some(error) = error {
            patch.insert("error".to_string(), error.to_string());
        }
        self.gateway.patch_config(&name, patch).await?;
        Ok(())
    }

    /// Reads the current build status. When the tracker record has already
    /// been garbage-collected (past its grace window) but the configuration
    /// record for the instance still exists, the build is synthesized as
    /// `completed` rather than reported missing.
    pub async fn read(&self, instance_id: &str) -> Result<BuildStatus, Error> {
        let status_name = object_name(ObjectKind::BuildStatus, instance_id, "");
        match self.gateway.read_config(&status_name).await {
            Ok(record) => {
                let state = record
                    .data
                    .get("state")
                    .and_then(|s| s.parse::<BuildState>().ok())
                    .unwrap_or(BuildState::Queued);
                Ok(BuildStatus {
                    instance_id: instance_id.to_string(),
                    status: state,
                    error: record.data.get("error").cloned(),
                })
            }
            Err(OrchestratorError::NotFound) => {
                let config_name = object_name(ObjectKind::Config, instance_id, "");
                match self.gateway.read_config(&config_name).await {
                    Ok(_) => Ok(BuildStatus {
                        instance_id: instance_id.to_string(),
                        status: BuildState::Completed,
                        error: None,
                    }),
                    Err(OrchestratorError::NotFound) => {
                        Err(Error::from_kind(ErrorKind::NotFound))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether `state` is one after which the record becomes eligible for
    /// the grace-window cleanup described in the tracker's design notes.
    pub fn is_terminal(state: BuildState) -> bool {
        state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FakeOrchestrator;

    #[tokio::test]
    async fn start_then_read_round_trips_queued_state() {
        let gateway = FakeOrchestrator::new();
        let tracker = BuildTracker::new(gateway);
        tracker.start("alice-abc12345", BTreeMap::new()).await.unwrap();

        let status = tracker.read("alice-abc12345").await.unwrap();
        assert_eq!(status.status, BuildState::Queued);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn set_state_failed_carries_error() {
        let gateway = FakeOrchestrator::new();
        let tracker = BuildTracker::new(gateway);
        tracker.start("alice-abc12345", BTreeMap::new()).await.unwrap();
        tracker
            .set_state("alice-abc12345", BuildState::Failed, Some("build exited 1"))
            .await
            .unwrap();

        let status = tracker.read("alice-abc12345").await.unwrap();
        assert_eq!(status.status, BuildState::Failed);
        assert_eq!(status.error.as_deref(), Some("build exited 1"));
    }

    #[tokio::test]
    async fn read_synthesizes_completed_when_tracker_gone_but_config_present() {
        let gateway = FakeOrchestrator::new();
        let config_name = object_name(ObjectKind::Config, "alice-abc12345", "");
        gateway
            .ensure_config(&config_name, BTreeMap::new(), BTreeMap::new())
            .await
            .unwrap();

        let tracker = BuildTracker::new(gateway);
        let status = tracker.read("alice-abc12345").await.unwrap();
        assert_eq!(status.status, BuildState::Completed);
    }

    #[tokio::test]
    async fn read_not_found_when_neither_record_exists() {
        let gateway = FakeOrchestrator::new();
        let tracker = BuildTracker::new(gateway);
        let err = tracker.read("nobody-00000000").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
