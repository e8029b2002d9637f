mod args;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use strato_compose::{
    CliComposeRunner, ClusterRequest, ClusterStore, ComposeCommand, CreateOptions, PortAllocator,
    PortRange, Provisioner,
};

use crate::args::{Args, ClusterArgs, Command};
use crate::output::{print_clusters, print_created, print_manifest, print_ports};

fn cluster_request(cluster: ClusterArgs) -> ClusterRequest {
    ClusterRequest::new(cluster.name, cluster.version)
        .with_topology(cluster.topology)
        .with_brokers(cluster.brokers)
}

async fn build_provisioner(args: &Args) -> Result<Provisioner> {
    let range = PortRange::new(args.port_range_start, args.port_range_end)?;
    let ports = PortAllocator::new(range).with_host_check(args.check_host_ports);

    let command = ComposeCommand::parse(&args.compose_bin)
        .context("--compose-bin must not be empty")?;
    let runner = CliComposeRunner::new(command)
        .with_timeout(args.compose_timeout_secs.map(Duration::from_secs));

    let store = ClusterStore::open(&args.work_dir)
        .await
        .with_context(|| format!("failed to open work dir {}", args.work_dir.display()))?;

    let prov = Provisioner::new(store, ports, Arc::new(runner));
    prov.seed_from_store().await?;
    Ok(prov)
}

async fn run(args: Args) -> Result<()> {
    let prov = build_provisioner(&args).await?;

    match args.command {
        Command::Create {
            cluster,
            force,
            no_start,
        } => {
            let req = cluster_request(cluster);
            let opts = CreateOptions {
                force,
                start: !no_start,
            };
            let out = prov.create(&req, opts).await?;
            print_created(&out);
        }
        Command::Render { cluster } => {
            let req = cluster_request(cluster);
            let (ports, compose) = prov.preview(&req).await?;
            print!("{}", compose.to_yaml()?);
            eprintln!(
                "# brokers {} / ui {} (not reserved until `create`)",
                ports.bootstrap_servers(),
                ports.ui
            );
        }
        Command::Up { name } => {
            let m = prov.up(&name).await?;
            println!("✓ Cluster '{}' started", name);
            print_ports(&m.ports);
        }
        Command::Down { name, purge } => {
            prov.destroy(&name, purge).await?;
            if purge {
                println!("✓ Cluster '{}' stopped and removed", name);
            } else {
                println!("✓ Cluster '{}' stopped", name);
            }
        }
        Command::List { json } => {
            let clusters = prov.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else {
                print_clusters(&clusters);
            }
        }
        Command::Show { name } => {
            let m = prov.get(&name).await?;
            print_manifest(&m);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let otel = strato_common::telemetry::init_tracing(
        "strato",
        &args.log_format,
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let result = run(args).await;
    if let Err(e) = &result {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("✗ {e:#}");
    }

    if let Some(provider) = otel {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }

    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
