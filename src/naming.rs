//! Deterministic derivation of instance identifiers, object names, URL paths,
//! and connection tokens.

use rand::RngCore;

pub const INSTANCES_PATH_PREFIX: &str = "/instances";

/// Max length an orchestrator object name may have, minus a little slack for
/// the longest suffix we append (`-build-status`, 13 bytes).
const MAX_NAME_LEN: usize = 63 - 13;

fn lower_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `instance_id := user_id + "-" + lower_hex(8 random bytes)`.
///
/// Rejects user ids that would not survive as a valid orchestrator object
/// name component: lowercase alphanumerics and `-` only, and short enough
/// that every suffixed object name we derive from it still fits.
pub fn instance_id(user_id: &str) -> Result<String, crate::Error> {
    if user_id.is_empty()
        || user_id.len() > MAX_NAME_LEN
        || !user_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(crate::Error::custom(
            crate::ErrorKind::InvalidRequest,
            "user_id must be lowercase alphanumeric/hyphen and short enough to name orchestrator objects",
        ));
    }

    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    Ok(format!("{user_id}-{}", lower_hex(&suffix)))
}

/// `access_token := lower_hex(16 random bytes)`.
///
/// Hex never contains `-`, which the editor's connection-token parser
/// rejects, so no further validation is needed here.
pub fn access_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    lower_hex(&bytes)
}

pub fn instance_path(instance_id: &str) -> String {
    format!("{INSTANCES_PATH_PREFIX}/{instance_id}")
}

/// Recovers the owning `user_id` from an `instance_id`, reversing
/// [`instance_id`]'s `<user_id>-<8 hex>` construction. Used by endpoints that
/// only carry the instance id in their path.
pub fn user_id_from_instance(instance_id: &str) -> Option<&str> {
    let (user_id, suffix) = instance_id.rsplit_once('-')?;
    if suffix.len() == 8 && suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(user_id)
    } else {
        None
    }
}

/// The orchestrator object kinds the Naming & Token Service knows how to name.
/// `SharedVolume` is keyed by `user_id`, every other kind by `instance_id`.
pub enum ObjectKind {
    Config,
    BuildStatus,
    BuildLogs,
    WorkspaceVolume,
    SharedVolume,
    Workload,
    Service,
    Ingress,
}

pub fn object_name(kind: ObjectKind, instance_id: &str, user_id: &str) -> String {
    match kind {
        ObjectKind::Config => format!("{instance_id}-config"),
        ObjectKind::BuildStatus => format!("{instance_id}-build-status"),
        ObjectKind::BuildLogs => format!("{instance_id}-build-logs"),
        ObjectKind::WorkspaceVolume => format!("{instance_id}-workspace"),
        ObjectKind::SharedVolume => format!("{user_id}-shared"),
        ObjectKind::Workload => instance_id.to_string(),
        ObjectKind::Service => format!("{instance_id}-service"),
        ObjectKind::Ingress => format!("{instance_id}-ingress"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn instance_id_matches_expected_shape() {
        let id = instance_id("alice").unwrap();
        let re = Regex::new(r"^alice-[0-9a-f]{8}$").unwrap();
        assert!(re.is_match(&id), "{id} did not match expected pattern");
    }

    #[test]
    fn instance_id_rejects_invalid_user_id() {
        assert!(instance_id("Bad User!").is_err());
        assert!(instance_id("").is_err());
    }

    #[test]
    fn instance_ids_are_not_reused() {
        let a = instance_id("alice").unwrap();
        let b = instance_id("alice").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn access_token_never_contains_hyphen() {
        for _ in 0..100 {
            assert!(!access_token().contains('-'));
        }
    }

    #[test]
    fn object_names_follow_convention() {
        assert_eq!(
            object_name(ObjectKind::Config, "carol-abc12345", "carol"),
            "carol-abc12345-config"
        );
        assert_eq!(
            object_name(ObjectKind::SharedVolume, "carol-abc12345", "carol"),
            "carol-shared"
        );
        assert_eq!(
            object_name(ObjectKind::Workload, "carol-abc12345", "carol"),
            "carol-abc12345"
        );
    }

    #[test]
    fn user_id_from_instance_reverses_instance_id() {
        let id = instance_id("carol").unwrap();
        assert_eq!(user_id_from_instance(&id), Some("carol"));
        assert_eq!(user_id_from_instance("not-an-instance-id"), None);
    }
}
