//! Jiva volume upgrade: controller deployment, controller service and
//! replica statefulset of one persistent volume.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Container, Pod, PodTemplateSpec, Service};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::task::StatusRecorder;
use super::workload::{Patched, version};
use super::{ResourcePatch, UpgradeOptions, Upgrader, run_steps};
use crate::error::SmuError;
use crate::k8s::ClusterApi;
use crate::labels::{
    COMPONENT_NAME_LABEL, JIVA_CONTROLLER_LABEL, JIVA_REPLICA_LABEL, JIVA_SERVICE_LABEL, PV_LABEL,
    VERSION_LABEL, all_of, selector,
};
use crate::patch;
use crate::retry::RetryPolicy;

/// Component name of the operator that must be upgraded before its volumes.
pub const JIVA_OPERATOR: &str = "jiva-operator";

/// Upgrade Jiva volume `res.name`, recording progress in its `UpgradeTask`.
pub async fn upgrade<C: ClusterApi>(cluster: &C, res: &ResourcePatch, options: &UpgradeOptions) -> Result<()> {
    info!("Upgrading jiva volume {} from {} to {}", res.name, res.from, res.to);
    let mut recorder = StatusRecorder::open(cluster, res, options).await?;
    debug!("Recording progress in upgradetask {}", recorder.task().name_any());
    let mut volume = JivaVolume::new(cluster, res, options.poll);

    let outcome = run_steps(&mut recorder, &mut volume).await;
    let finished = recorder.finish(&outcome).await;
    match (outcome, finished) {
        (Err(e), Err(finish_err)) => {
            warn!("Failed to close upgradetask for {}: {:#}", res.name, finish_err);
            return Err(e);
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => return Err(e),
        (Ok(()), Ok(())) => {}
    }

    info!("Successfully upgraded jiva volume {} to {}", res.name, res.to);
    Ok(())
}

/// Rewrite `image` to the upgraded repository, without tag.
///
/// The tag is everything after the last `:`. With a `prefix`, the repository
/// path is replaced by `prefix` followed by the image name.
pub fn image_url(image: &str, prefix: &str) -> Result<String, SmuError> {
    let Some((base, _tag)) = image.rsplit_once(':') else {
        return Err(SmuError::InvalidConfiguration(format!(
            "no version tag found on image {image}"
        )));
    };
    if prefix.is_empty() {
        return Ok(base.to_string());
    }
    let image_name = base.rsplit('/').next().unwrap_or(base);
    Ok(format!("{prefix}{image_name}"))
}

fn retag_containers(containers: &mut [Container], res: &ResourcePatch) -> Result<(), SmuError> {
    for container in containers {
        let image = container.image.as_deref().unwrap_or_default();
        let url = image_url(image, &res.base_url)?;
        container.image = Some(format!("{url}:{}", res.tag()));
    }
    Ok(())
}

/// Version label on the pod template and retagged images for its containers.
fn upgrade_template(template: &mut PodTemplateSpec, res: &ResourcePatch) -> Result<(), SmuError> {
    template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(Default::default)
        .insert(VERSION_LABEL.to_string(), res.to.clone());
    match template.spec.as_mut() {
        Some(pod_spec) => retag_containers(&mut pod_spec.containers, res),
        None => Ok(()),
    }
}

/// Upgraded controller deployment: images and version labels.
pub fn transform_controller(deploy: &mut Deployment, res: &ResourcePatch) -> Result<(), SmuError> {
    deploy.labels_mut()
        .insert(VERSION_LABEL.to_string(), res.to.clone());
    deploy.spec
        .as_mut()
        .map_or(Ok(()), |spec| upgrade_template(&mut spec.template, res))
}

/// Upgraded replica statefulset: images and version labels.
pub fn transform_replicas(sts: &mut StatefulSet, res: &ResourcePatch) -> Result<(), SmuError> {
    sts.labels_mut()
        .insert(VERSION_LABEL.to_string(), res.to.clone());
    sts.spec
        .as_mut()
        .map_or(Ok(()), |spec| upgrade_template(&mut spec.template, res))
}

/// Upgraded controller service: version label only.
pub fn transform_service(svc: &mut Service, res: &ResourcePatch) {
    svc.labels_mut()
        .insert(VERSION_LABEL.to_string(), res.to.clone());
}

/// Workloads of one Jiva volume, resolved by `init`.
pub struct JivaVolume<'a, C> {
    cluster: &'a C,
    res: &'a ResourcePatch,
    poll: RetryPolicy,
    controller: Option<Patched<Deployment>>,
    replicas: Option<Patched<StatefulSet>>,
    service: Option<Patched<Service>>,
}

impl<'a, C: ClusterApi> JivaVolume<'a, C> {
    pub const fn new(cluster: &'a C, res: &'a ResourcePatch, poll: RetryPolicy) -> Self {
        Self {
            cluster,
            res,
            poll,
            controller: None,
            replicas: None,
            service: None,
        }
    }

    fn resolved(&self) -> Result<(&Patched<Deployment>, &Patched<StatefulSet>, &Patched<Service>)> {
        match (&self.controller, &self.replicas, &self.service) {
            (Some(c), Some(r), Some(s)) => Ok((c, r, s)),
            _ => Err(SmuError::InvalidConfiguration(format!(
                "workloads of volume {} are not resolved",
                self.res.name
            ))
            .into()),
        }
    }
}

/// Every pod of `component` must already run version `to`.
async fn verify_operator<C: ClusterApi>(cluster: &C, namespace: &str, component: &str, to: &str) -> Result<()> {
    let pods = cluster
        .list::<Pod>(namespace, &selector(COMPONENT_NAME_LABEL, component))
        .await?;
    if pods.is_empty() {
        return Err(SmuError::NotFound(format!("{component} pods")).into());
    }
    for pod in &pods {
        let current = version(pod);
        if current != to {
            return Err(SmuError::PreCheckFailed(format!(
                "{component} is in '{current}' version, please upgrade it to {to} version"
            ))
            .into());
        }
    }
    Ok(())
}

#[async_trait]
impl<C: ClusterApi> Upgrader for JivaVolume<'_, C> {
    async fn init(&mut self) -> Result<()> {
        let res = self.res;
        let ns = res.namespace.as_str();
        let pv = selector(PV_LABEL, &res.name);

        let mut controller = Patched::<Deployment>::get(self.cluster, ns, &all_of(&[JIVA_CONTROLLER_LABEL, &pv]))
            .await
            .with_context(|| format!("failed to get controller deployment for volume {}", res.name))?;
        let mut replicas = Patched::<StatefulSet>::get(self.cluster, ns, &all_of(&[JIVA_REPLICA_LABEL, &pv]))
            .await
            .with_context(|| format!("failed to list replica statefulset for volume {}", res.name))?;
        let mut service = Patched::<Service>::get(self.cluster, ns, &all_of(&[JIVA_SERVICE_LABEL, &pv]))
            .await
            .with_context(|| format!("failed to get target svc for volume {}", res.name))?;

        let mut desired = controller.object.clone();
        controller.patch = transform_controller(&mut desired, res)
            .map_err(anyhow::Error::from)
            .and_then(|()| patch::diff(&controller.object, &desired))
            .with_context(|| format!("failed to create target deploy patch for volume {}", res.name))?;

        let mut desired = replicas.object.clone();
        replicas.patch = transform_replicas(&mut desired, res)
            .map_err(anyhow::Error::from)
            .and_then(|()| patch::diff(&replicas.object, &desired))
            .with_context(|| format!("failed to create replica sts patch for volume {}", res.name))?;

        let mut desired = service.object.clone();
        transform_service(&mut desired, res);
        service.patch = patch::diff(&service.object, &desired)
            .with_context(|| format!("failed to create target svc patch for volume {}", res.name))?;

        self.controller = Some(controller);
        self.replicas = Some(replicas);
        self.service = Some(service);
        Ok(())
    }

    async fn pre_upgrade(&mut self) -> Result<()> {
        let res = self.res;
        verify_operator(self.cluster, &res.namespace, JIVA_OPERATOR, &res.to)
            .await
            .with_context(|| format!("failed to verify {JIVA_OPERATOR}"))?;

        let (controller, replicas, service) = self.resolved()?;
        controller
            .pre_checks(&res.from, &res.to)
            .context("failed to verify controller deploy")?;
        replicas
            .pre_checks(&res.from, &res.to)
            .context("failed to verify replica statefulset")?;
        service
            .pre_checks(&res.from, &res.to)
            .context("failed to verify target svc")?;
        Ok(())
    }

    async fn target_upgrade(&mut self) -> Result<()> {
        let res = self.res;
        let (controller, _, service) = self.resolved()?;
        controller
            .apply(self.cluster, &res.namespace, &res.to, &self.poll)
            .await
            .context("failed to patch target deploy")?;
        service
            .apply(self.cluster, &res.namespace, &res.to, &self.poll)
            .await
            .context("failed to patch target svc")?;
        Ok(())
    }

    async fn replica_upgrade(&mut self) -> Result<()> {
        let res = self.res;
        let (_, replicas, _) = self.resolved()?;
        replicas
            .apply(self.cluster, &res.namespace, &res.to, &self.poll)
            .await
            .context("failed to patch replica statefulset")?;
        Ok(())
    }
}
