//! `StoragePoolClaim` to `CStorPoolCluster` migration.
//!
//! Every step is a hard gate and safe to re-run. The claim is deleted last,
//! so a missing claim next to an equally named cluster means a previous run
//! finished.

pub mod block_device;
pub mod generate;
pub mod transition;
pub mod validate;

use anyhow::{Context, Result};
use kube::{Resource, ResourceExt};
use tracing::info;

use crate::crd::{CStorPool, CStorPoolCluster, CStorPoolInstance, StoragePoolClaim};
use crate::error::SmuError;
use crate::k8s::{ClusterApi, EventKind};
use crate::labels::{CSPC_LABEL, SPC_LABEL, selector};
use crate::retry::RetryPolicy;

/// Result of migrating one claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated,
    AlreadyMigrated,
}

impl std::fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Migrated => write!(f, "migrated"),
            Self::AlreadyMigrated => write!(f, "already migrated"),
        }
    }
}

/// Migrates claims in one OpenEBS namespace.
pub struct Migrator<'a, C> {
    cluster: &'a C,
    namespace: String,
    poll: RetryPolicy,
}

impl<'a, C: ClusterApi> Migrator<'a, C> {
    pub fn new(cluster: &'a C, namespace: impl Into<String>, poll: RetryPolicy) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            poll,
        }
    }

    /// Migrate claim `name` to a pool cluster of the same name.
    pub async fn migrate(&self, name: &str) -> Result<MigrationOutcome> {
        let Some(spc) = self.cluster.get::<StoragePoolClaim>("", name).await? else {
            info!("spc {} not found", name);
            self.cluster
                .get::<CStorPoolCluster>(&self.namespace, name)
                .await?
                .ok_or_else(|| SmuError::NotFound(format!("CStorPoolCluster {name}")))
                .with_context(|| format!("failed to get equivalent cspc for spc {name}"))?;
            info!("spc {} is already migrated to cspc", name);
            return Ok(MigrationOutcome::AlreadyMigrated);
        };

        match self.migrate_claim(&spc).await {
            Ok(()) => Ok(MigrationOutcome::Migrated),
            Err(e) => {
                self.cluster
                    .publish_event(
                        &spc.object_ref(&()),
                        EventKind::Warning,
                        "MigrationFailed",
                        &format!("{e:#}"),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn migrate_claim(&self, spc: &StoragePoolClaim) -> Result<()> {
        let name = spc.name_any();
        let ns = self.namespace.as_str();

        let csps = self
            .cluster
            .list::<CStorPool>("", &selector(SPC_LABEL, &name))
            .await?;
        validate::validate_spc(spc, &csps)
            .with_context(|| format!("failed to validate spc {name}"))?;

        block_device::relabel_claims(self.cluster, ns, &name).await?;

        let cspc = generate::ensure_cspc(self.cluster, ns, spc, &csps, &self.poll).await?;
        block_device::rewrite_owner_refs(self.cluster, ns, &cspc).await?;

        let cspis = self
            .cluster
            .list::<CStorPoolInstance>(ns, &selector(CSPC_LABEL, &name))
            .await?;
        for cspi in cspis {
            let cspi_name = cspi.name_any();
            if cspi.is_online() {
                info!("cspi {} is already ONLINE, checking its replicas", cspi_name);
                transition::resume_online(self.cluster, ns, &cspi, &name)
                    .await
                    .with_context(|| format!("failed to resume cspi {cspi_name}"))?;
                continue;
            }
            let cspi = transition::csp_to_cspi(self.cluster, ns, cspi, &name, &self.poll)
                .await
                .with_context(|| format!("failed to migrate cspi {cspi_name}"))?;
            self.cluster
                .publish_event(
                    &cspi.object_ref(&()),
                    EventKind::Normal,
                    "PoolMigrated",
                    &format!("Imported legacy pool of spc {name}"),
                )
                .await;
        }

        self.cluster
            .delete::<StoragePoolClaim>("", &name)
            .await
            .with_context(|| format!("failed to delete spc {name}"))?;

        info!("Migrated spc {} to cspc {}", name, cspc.name_any());
        self.cluster
            .publish_event(
                &cspc.object_ref(&()),
                EventKind::Normal,
                "Migrated",
                &format!("Migrated from spc {name}"),
            )
            .await;
        Ok(())
    }
}
