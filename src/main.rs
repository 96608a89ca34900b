use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use vectorsnap::config::Config;
use vectorsnap::discovery::{discover_nodes, DnsResolver};
use vectorsnap::error::Result;
use vectorsnap::orchestrator::{run_prefix, BackupOrchestrator, RunReport};
use vectorsnap::retry::RetryPolicy;
use vectorsnap::snapshots::{HttpSnapshotApi, SnapshotApi};
use vectorsnap::transfer::compression_level;

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}

async fn run(config: Config) -> Result<RunReport> {
    let store = config.object_store()?;
    let resolver = DnsResolver::from_system_conf()?;
    let http = reqwest::Client::new();

    let nodes = discover_nodes(&resolver, &config.service_address, |address| {
        let api = HttpSnapshotApi::for_address(
            http.clone(),
            address,
            config.control_port,
            config.data_port,
            &config.api_key,
        )?;
        Ok(Arc::new(api) as Arc<dyn SnapshotApi>)
    })
    .await?;
    info!(nodes = nodes.len(), "discovered cluster nodes");

    let mut orchestrator = BackupOrchestrator::new(
        store,
        RetryPolicy::default(),
        compression_level(config.compression_level),
        run_prefix(),
    );
    if let Some(limit) = config.max_concurrency {
        orchestrator = orchestrator.with_max_concurrency(limit);
    }

    Ok(orchestrator.run(&config.collections, &nodes).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = Config::parse();
    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        return ExitCode::from(2);
    }

    match run(config).await {
        Ok(report) => {
            println!(
                "finished, successes: {}/{}",
                report.successes, report.total
            );
            if report.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!(error = %err, "backup run failed");
            ExitCode::FAILURE
        }
    }
}
