//! `UpgradeTask` audit resource and its per-step status entries.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SmuError;

/// `UpgradeTask` spec records the version transition of one upgrade run.
///
/// The installed CRD declares no status subresource; `status` is written
/// together with the object.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "UpgradeTask",
    plural = "upgradetasks",
    shortname = "utask",
    namespaced,
    status = "UpgradeTaskStatus",
    printcolumn = r#"{"name":"FROM","type":"string","jsonPath":".spec.fromVersion"}"#,
    printcolumn = r#"{"name":"TO","type":"string","jsonPath":".spec.toVersion"}"#,
    printcolumn = r#"{"name":"PHASE","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTaskSpec {
    pub from_version: String,
    pub to_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_tag: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_prefix: String,

    #[serde(default)]
    pub resource_spec: ResourceSpec,
}

/// The resource an upgrade task targets. Exactly one field is set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jiva_volume: Option<JivaVolumeRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JivaVolumeRef {
    pub pv_name: String,
}

/// Overall phase of an upgrade task.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum UpgradePhase {
    Started,
    Success,
    Error,
}

/// Steps of a volume upgrade, in the order they run.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStep {
    PreUpgrade,
    TargetUpgrade,
    ReplicaUpgrade,
}

impl std::fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreUpgrade => write!(f, "PRE_UPGRADE"),
            Self::TargetUpgrade => write!(f, "TARGET_UPGRADE"),
            Self::ReplicaUpgrade => write!(f, "REPLICA_UPGRADE"),
        }
    }
}

/// Phase of a single step. `Waiting` resolves to one of the other two.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum StepPhase {
    Waiting,
    Completed,
    Errored,
}

/// Status of one step of the run.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeDetailedStatus {
    pub step: UpgradeStep,
    pub phase: StepPhase,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    pub start_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
}

impl UpgradeDetailedStatus {
    /// A fresh `Waiting` entry for `step`.
    pub fn waiting(step: UpgradeStep) -> Self {
        let now = Utc::now();
        Self {
            step,
            phase: StepPhase::Waiting,
            message: String::new(),
            reason: String::new(),
            start_time: now,
            last_updated_time: now,
        }
    }

    /// Resolve the step as `Completed` with a message.
    pub fn completed(step: UpgradeStep, message: impl Into<String>) -> Self {
        Self {
            phase: StepPhase::Completed,
            message: message.into(),
            ..Self::waiting(step)
        }
    }

    /// Resolve the step as `Errored` with the stage description and its cause.
    pub fn errored(step: UpgradeStep, message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            phase: StepPhase::Errored,
            message: message.into(),
            reason: reason.into(),
            ..Self::waiting(step)
        }
    }

    /// Check that the entry may be persisted.
    ///
    /// Step and phase are always present by construction. A resolved entry
    /// needs a message and an errored one also needs a reason.
    pub fn validate(&self) -> Result<(), SmuError> {
        if self.message.is_empty() && self.phase != StepPhase::Waiting {
            return Err(SmuError::InvalidStatus(format!(
                "{} {:?} requires a message",
                self.step, self.phase
            )));
        }
        if self.reason.is_empty() && self.phase == StepPhase::Errored {
            return Err(SmuError::InvalidStatus(format!(
                "{} Errored requires a reason",
                self.step
            )));
        }
        Ok(())
    }
}

/// `UpgradeTask` status: overall phase plus the ledger of step statuses.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTaskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<UpgradePhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,

    /// Number of failed runs so far.
    #[serde(default)]
    pub retries: i32,

    #[serde(default)]
    pub upgrade_detailed_statuses: Vec<UpgradeDetailedStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_without_message_is_valid() {
        let status = UpgradeDetailedStatus::waiting(UpgradeStep::PreUpgrade);
        assert!(status.validate().is_ok());
    }

    #[test]
    fn test_errored_without_reason_is_rejected() {
        let status = UpgradeDetailedStatus::errored(
            UpgradeStep::TargetUpgrade,
            "failed to patch target svc",
            "",
        );
        let err = status.validate().unwrap_err();
        assert!(matches!(err, SmuError::InvalidStatus(_)));
        assert!(err.to_string().contains("reason"));
    }

    #[test]
    fn test_completed_without_message_is_rejected() {
        let status = UpgradeDetailedStatus::completed(UpgradeStep::ReplicaUpgrade, "");
        assert!(status.validate().is_err());
    }

    #[test]
    fn test_errored_with_message_and_reason_is_valid() {
        let status = UpgradeDetailedStatus::errored(
            UpgradeStep::PreUpgrade,
            "failed to verify controller deploy",
            "deployment version 1.0.0 is neither 2.11.0 nor 2.12.0",
        );
        assert!(status.validate().is_ok());
    }

    #[test]
    fn test_step_serializes_screaming_snake_case() {
        let json = serde_json::to_value(UpgradeStep::PreUpgrade).unwrap();
        assert_eq!(json, "PRE_UPGRADE");
        assert_eq!(UpgradeStep::ReplicaUpgrade.to_string(), "REPLICA_UPGRADE");
    }

    #[test]
    fn test_status_default_has_empty_ledger() {
        let status = UpgradeTaskStatus::default();
        assert!(status.phase.is_none());
        assert!(status.upgrade_detailed_statuses.is_empty());
        assert_eq!(status.retries, 0);
    }
}
