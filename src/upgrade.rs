//! Step-based volume upgrade with a persisted status ledger.
//!
//! An upgrade runs `PreUpgrade`, `TargetUpgrade` and `ReplicaUpgrade` in
//! order. Each step is recorded as `Waiting` before it runs and resolved to
//! `Completed` or `Errored` afterwards in the `UpgradeTask` of the resource.

pub mod jiva;
pub mod task;
pub mod workload;

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::crd::UpgradeStep;
use crate::k8s::ClusterApi;
use crate::retry::RetryPolicy;
use task::StatusRecorder;

/// What to upgrade and to which version. Fixed for the whole run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourcePatch {
    pub from: String,
    pub to: String,
    /// Image tag override. Empty means the tag is `to`.
    pub image_tag: String,
    /// Registry path replacing the image repository. Empty keeps it.
    pub base_url: String,
    pub name: String,
    pub namespace: String,
}

impl ResourcePatch {
    /// Tag the upgraded images get.
    pub fn tag(&self) -> &str {
        if self.image_tag.is_empty() {
            &self.to
        } else {
            &self.image_tag
        }
    }
}

/// How failures to persist step status are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Running as a Job: a status write failure aborts the upgrade.
    #[default]
    Strict,
    /// Ad hoc run: status write failures are logged and ignored.
    BestEffort,
}

#[derive(Clone, Debug, Default)]
pub struct UpgradeOptions {
    pub status_policy: StatusPolicy,
    /// Keep step statuses of earlier runs instead of resetting the ledger.
    pub keep_step_history: bool,
    pub poll: RetryPolicy,
    /// Pod this process runs in, used to find the Job's backoff limit.
    pub pod_name: Option<String>,
}

/// A resource upgrade split into the three ledger steps.
///
/// Errors should carry the failed stage as their outermost context; it
/// becomes the step message and the rest of the chain its reason.
#[async_trait]
pub trait Upgrader: Send {
    /// Resolve the workloads and compute their patches.
    async fn init(&mut self) -> Result<()>;

    /// Check that the resource may move from `from` to `to`.
    async fn pre_upgrade(&mut self) -> Result<()>;

    async fn target_upgrade(&mut self) -> Result<()>;

    async fn replica_upgrade(&mut self) -> Result<()>;
}

/// Run all steps of `upgrader`, recording each one.
pub async fn run_steps<C, U>(recorder: &mut StatusRecorder<'_, C>, upgrader: &mut U) -> Result<()>
where
    C: ClusterApi,
    U: Upgrader,
{
    run_step(
        recorder,
        UpgradeStep::PreUpgrade,
        "Pre-upgrade steps were successful",
        async {
            upgrader.init().await?;
            upgrader.pre_upgrade().await
        },
    )
    .await?;

    run_step(
        recorder,
        UpgradeStep::TargetUpgrade,
        "Target upgrade was successful",
        upgrader.target_upgrade(),
    )
    .await?;

    run_step(
        recorder,
        UpgradeStep::ReplicaUpgrade,
        "Replica upgrade was successful",
        upgrader.replica_upgrade(),
    )
    .await
}

async fn run_step<C, F>(
    recorder: &mut StatusRecorder<'_, C>,
    step: UpgradeStep,
    success: &str,
    work: F,
) -> Result<()>
where
    C: ClusterApi,
    F: Future<Output = Result<()>>,
{
    recorder.waiting(step).await?;
    match work.await {
        Ok(()) => {
            info!("{} completed: {}", step, success);
            recorder.completed(step, success).await
        }
        Err(e) => {
            let (message, reason) = split_error(&e);
            recorder.errored(step, &message, &reason).await?;
            Err(e)
        }
    }
}

/// Split an error into its outermost context and the cause beneath it.
pub fn split_error(err: &anyhow::Error) -> (String, String) {
    let message = err.to_string();
    let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
    let reason = if causes.is_empty() {
        message.clone()
    } else {
        causes.join(": ")
    };
    (message, reason)
}
