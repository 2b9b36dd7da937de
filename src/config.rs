//! CLI configuration and argument parsing.

use clap::{Parser, Subcommand, ValueEnum};

use crate::retry::RetryPolicy;
use crate::upgrade::{ResourcePatch, StatusPolicy, UpgradeOptions};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Storage migration and upgrade job for OpenEBS.
///
/// Migrates cStor pools from StoragePoolClaims to CStorPoolClusters and
/// upgrades Jiva volumes, one name at a time.
#[derive(Parser, Debug, Clone)]
#[command(name = "smu")]
#[command(about = "Storage migration and upgrade job for OpenEBS")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Namespace OpenEBS control plane components run in
    #[arg(long, global = true, default_value = "openebs", env = "OPENEBS_NAMESPACE")]
    pub openebs_namespace: String,

    /// Kubernetes context to use
    #[arg(long, global = true, env = "KUBECONFIG_CONTEXT")]
    pub context: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "SMU_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "json", env = "SMU_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Stop at the first failed name instead of processing the rest
    #[arg(long, global = true, default_value = "false")]
    pub fail_fast: bool,

    /// Pod this job runs in; enables strict status handling and backoff tracking
    #[arg(long, global = true, env = "POD_NAME", hide = true)]
    pub pod_name: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Migrate cStor pools from StoragePoolClaim to CStorPoolCluster
    #[command(after_help = r#"Examples:
  smu cstor-pool pool-a
  smu cstor-pool pool-a pool-b"#)]
    CstorPool {
        /// StoragePoolClaim names to migrate
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// Upgrade Jiva volumes to a new OpenEBS version
    #[command(after_help = r#"Examples:
  smu jiva-volume pvc-1 --from-version 2.11.0 --to-version 2.12.0"#)]
    JivaVolume {
        /// Persistent volume names to upgrade
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,

        /// Version the volumes are currently at
        #[arg(long)]
        from_version: String,

        /// Version to upgrade the volumes to
        #[arg(long)]
        to_version: String,

        /// Registry path replacing the image repository, e.g. quay.io/openebs/
        #[arg(long, default_value = "")]
        to_version_image_prefix: String,

        /// Image tag override, defaults to the target version
        #[arg(long, default_value = "")]
        to_version_image_tag: String,

        /// Keep step statuses of earlier runs in the upgrade task
        #[arg(long, default_value = "false")]
        keep_step_history: bool,
    },
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub context: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub fail_fast: bool,
    pub pod_name: Option<String>,
    pub command: Command,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            namespace: args.openebs_namespace,
            context: args.context,
            log_level: args.log_level,
            log_format: args.log_format,
            fail_fast: args.fail_fast,
            pod_name: args.pod_name.filter(|p| !p.is_empty()),
            command: args.command,
        }
    }

    /// Status writes are strict only when running inside a Job pod.
    pub const fn status_policy(&self) -> StatusPolicy {
        if self.pod_name.is_some() {
            StatusPolicy::Strict
        } else {
            StatusPolicy::BestEffort
        }
    }

    /// Upgrade options for the `jiva-volume` subcommand.
    pub fn upgrade_options(&self, keep_step_history: bool) -> UpgradeOptions {
        UpgradeOptions {
            status_policy: self.status_policy(),
            keep_step_history,
            poll: RetryPolicy::DEFAULT,
            pod_name: self.pod_name.clone(),
        }
    }

    /// Target of one Jiva volume upgrade, `None` for other subcommands.
    pub fn resource_patch(&self, name: &str) -> Option<ResourcePatch> {
        match &self.command {
            Command::JivaVolume {
                from_version,
                to_version,
                to_version_image_prefix,
                to_version_image_tag,
                ..
            } => Some(ResourcePatch {
                from: from_version.clone(),
                to: to_version.clone(),
                image_tag: to_version_image_tag.clone(),
                base_url: to_version_image_prefix.clone(),
                name: name.to_string(),
                namespace: self.namespace.clone(),
            }),
            Command::CstorPool { .. } => None,
        }
    }
}
