//! `UpgradeTask` lifecycle and the step status ledger.

use anyhow::{Context, Result};
use chrono::Utc;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::{ResourcePatch, StatusPolicy, UpgradeOptions};
use crate::crd::{
    JivaVolumeRef, ResourceSpec, StepPhase, UpgradeDetailedStatus, UpgradePhase, UpgradeStep,
    UpgradeTask, UpgradeTaskSpec, UpgradeTaskStatus,
};
use crate::error::SmuError;
use crate::k8s::job::{DEFAULT_BACKOFF_LIMIT, backoff_limit};
use crate::k8s::{ClusterApi, EventKind};

/// Name of the task recording upgrades of Jiva volume `pv_name`.
pub fn task_name(pv_name: &str) -> String {
    format!("upgrade-jiva-volume-{pv_name}")
}

/// Build a new task for `res`.
pub fn build_upgrade_task(res: &ResourcePatch) -> UpgradeTask {
    let mut task = UpgradeTask::new(
        &task_name(&res.name),
        UpgradeTaskSpec {
            from_version: res.from.clone(),
            to_version: res.to.clone(),
            image_tag: res.image_tag.clone(),
            image_prefix: res.base_url.clone(),
            resource_spec: ResourceSpec {
                jiva_volume: Some(JivaVolumeRef {
                    pv_name: res.name.clone(),
                }),
            },
        },
    );
    task.metadata.namespace = Some(res.namespace.clone());
    task
}

/// Append a `Waiting` entry or resolve the last one.
///
/// A resolved entry keeps the start time of the entry it replaces. Invalid
/// entries are rejected and leave the ledger untouched.
pub fn apply_step_status(
    status: &mut UpgradeTaskStatus,
    mut entry: UpgradeDetailedStatus,
) -> Result<(), SmuError> {
    entry.validate()?;
    let now = Utc::now();
    entry.last_updated_time = now;

    if entry.phase == StepPhase::Waiting {
        entry.start_time = now;
        status.upgrade_detailed_statuses.push(entry);
        return Ok(());
    }

    let Some(last) = status.upgrade_detailed_statuses.last_mut() else {
        return Err(SmuError::InvalidStatus(format!(
            "{} {:?} has no Waiting entry to resolve",
            entry.step, entry.phase
        )));
    };
    entry.start_time = last.start_time;
    *last = entry;
    Ok(())
}

/// Persists step statuses of one run into its `UpgradeTask`.
pub struct StatusRecorder<'a, C> {
    cluster: &'a C,
    namespace: String,
    task: UpgradeTask,
    policy: StatusPolicy,
    pod_name: Option<String>,
}

impl<'a, C: ClusterApi> StatusRecorder<'a, C> {
    /// Fetch or create the task for `res` and start a run on it.
    pub async fn open(cluster: &'a C, res: &ResourcePatch, options: &UpgradeOptions) -> Result<Self> {
        let name = task_name(&res.name);
        let ns = res.namespace.as_str();

        let task = match cluster.get::<UpgradeTask>(ns, &name).await? {
            Some(task) => task,
            None => {
                info!("Creating upgradetask {}", name);
                cluster
                    .create(ns, &build_upgrade_task(res))
                    .await
                    .with_context(|| format!("failed to create upgradetask {name}"))?
            }
        };

        let mut recorder = Self {
            cluster,
            namespace: res.namespace.clone(),
            task,
            policy: options.status_policy,
            pod_name: options.pod_name.clone(),
        };

        let status = recorder.task.status.get_or_insert_with(Default::default);
        if status.start_time.is_none() {
            status.phase = Some(UpgradePhase::Started);
            status.start_time = Some(Utc::now());
        }
        if !options.keep_step_history {
            status.upgrade_detailed_statuses.clear();
        }
        recorder
            .persist()
            .await
            .context("failed to update upgradetask")?;
        Ok(recorder)
    }

    pub fn task(&self) -> &UpgradeTask {
        &self.task
    }

    pub async fn waiting(&mut self, step: UpgradeStep) -> Result<()> {
        self.record(UpgradeDetailedStatus::waiting(step)).await
    }

    pub async fn completed(&mut self, step: UpgradeStep, message: &str) -> Result<()> {
        self.record(UpgradeDetailedStatus::completed(step, message))
            .await
    }

    pub async fn errored(&mut self, step: UpgradeStep, message: &str, reason: &str) -> Result<()> {
        self.record(UpgradeDetailedStatus::errored(step, message, reason))
            .await
    }

    async fn record(&mut self, entry: UpgradeDetailedStatus) -> Result<()> {
        debug!("Recording {} {:?}", entry.step, entry.phase);
        let status = self.task.status.get_or_insert_with(Default::default);
        let applied = apply_step_status(status, entry)
            .map_err(anyhow::Error::from)
            .context("failed to update upgradetask status");
        match applied {
            Ok(()) => self.persist().await,
            Err(e) => self.tolerate(e),
        }
    }

    /// Close the run: `Success` on success, otherwise count the retry and
    /// mark the task `Error` once the Job's retries are used up.
    pub async fn finish(&mut self, outcome: &Result<()>) -> Result<()> {
        let limit = match (outcome, self.policy, self.pod_name.as_deref()) {
            (Err(_), StatusPolicy::Strict, Some(pod)) => Some(
                backoff_limit(self.cluster, &self.namespace, pod)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(
                            "Using default backoff limit {}: {:#}",
                            DEFAULT_BACKOFF_LIMIT, e
                        );
                        DEFAULT_BACKOFF_LIMIT
                    }),
            ),
            _ => None,
        };

        let status = self.task.status.get_or_insert_with(Default::default);
        let (kind, reason, note) = match outcome {
            Ok(()) => {
                status.phase = Some(UpgradePhase::Success);
                status.completed_time = Some(Utc::now());
                (EventKind::Normal, "UpgradeSucceeded", "Upgrade completed".to_string())
            }
            Err(e) => {
                status.retries += 1;
                if limit.is_none_or(|limit| status.retries >= limit) {
                    status.phase = Some(UpgradePhase::Error);
                    status.completed_time = Some(Utc::now());
                }
                (EventKind::Warning, "UpgradeFailed", format!("{e:#}"))
            }
        };

        let obj_ref = self.task.object_ref(&());
        self.cluster
            .publish_event(&obj_ref, kind, reason, &note)
            .await;
        self.persist().await
    }

    // upgradetasks.openebs.io has no status subresource, so the ledger is
    // merged into the main object.
    async fn persist(&mut self) -> Result<()> {
        let name = self.task.name_any();
        let patch = serde_json::json!({ "status": self.task.status });
        match self
            .cluster
            .patch::<UpgradeTask>(&self.namespace, &name, &patch)
            .await
        {
            Ok(task) => {
                self.task = task;
                Ok(())
            }
            Err(e) => self.tolerate(e.context("failed to update upgradetask")),
        }
    }

    fn tolerate(&self, err: anyhow::Error) -> Result<()> {
        match self.policy {
            StatusPolicy::Strict => Err(err),
            StatusPolicy::BestEffort => {
                warn!("Ignoring upgradetask status failure: {:#}", err);
                Ok(())
            }
        }
    }
}
