//! smu - storage migration and upgrade job for OpenEBS.
//!
//! Migrates cStor pools from the claim-scoped `StoragePoolClaim` schema to the
//! cluster-scoped `CStorPoolCluster` schema node by node, and upgrades Jiva
//! volumes through a step ledger recorded in `UpgradeTask` resources.

mod batch;
mod config;
mod crd;
mod error;
mod k8s;
mod labels;
mod migrate;
mod patch;
mod retry;
mod upgrade;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use config::{Args, BUILD_DATE, COMMIT, Command, Config, LogFormat, VERSION};
use k8s::KubeCluster;
use migrate::Migrator;
use retry::RetryPolicy;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    if let Err(e) = init_tracing(&config.log_level, config.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting smu v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    match run(&config).await {
        Ok(report) => {
            println!("{report}");
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize tracing. `RUST_LOG` takes precedence over `--log-level`.
fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    match format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        LogFormat::Text => fmt().with_env_filter(filter).compact().init(),
    }

    Ok(())
}

async fn run(config: &Config) -> Result<batch::BatchReport> {
    let client = k8s::client::build_client(config.context.as_deref()).await?;
    let cluster = KubeCluster::new(client);
    info!("Connected to Kubernetes API server");

    let report = match &config.command {
        Command::CstorPool { names } => {
            let migrator = Migrator::new(&cluster, config.namespace.as_str(), RetryPolicy::DEFAULT);
            let migrator = &migrator;
            batch::run(names, config.fail_fast, move |name| async move {
                migrator.migrate(&name).await.map(|o| o.to_string())
            })
            .await
        }
        Command::JivaVolume {
            names,
            keep_step_history,
            ..
        } => {
            let options = config.upgrade_options(*keep_step_history);
            let (cluster, options) = (&cluster, &options);
            batch::run(names, config.fail_fast, move |name| async move {
                let res = config
                    .resource_patch(&name)
                    .ok_or_else(|| anyhow::anyhow!("not a jiva-volume invocation"))?;
                upgrade::jiva::upgrade(cluster, &res, options).await?;
                Ok(format!("upgraded to {}", res.to))
            })
            .await
        }
    };

    Ok(report)
}
