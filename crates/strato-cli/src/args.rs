use std::path::PathBuf;

use clap::{Parser, Subcommand};

use strato_common::{ClusterName, Topology};
use strato_compose::ports::{DEFAULT_PORT_END, DEFAULT_PORT_START};
use strato_compose::DEFAULT_BROKERS;

#[derive(Debug, Parser)]
#[command(name = "strato")]
#[command(about = "Provision local multi-broker Kafka clusters with docker compose", long_about = None)]
pub struct Args {
    /// Directory holding compose_files/ and kafka_clusters/
    #[arg(long, env = "STRATO_WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// First host port the allocator may hand out
    #[arg(long, env = "STRATO_PORT_RANGE_START", default_value_t = DEFAULT_PORT_START)]
    pub port_range_start: u16,

    /// Last host port the allocator may hand out (inclusive)
    #[arg(long, env = "STRATO_PORT_RANGE_END", default_value_t = DEFAULT_PORT_END)]
    pub port_range_end: u16,

    /// Skip ports that are already bound on this host
    #[arg(long, default_value_t = false)]
    pub check_host_ports: bool,

    /// Compose command, e.g. "docker-compose" or "docker compose"
    #[arg(long, env = "STRATO_COMPOSE_BIN", default_value = "docker-compose")]
    pub compose_bin: String,

    /// Give up on a compose invocation after this many seconds
    #[arg(long, env = "STRATO_COMPOSE_TIMEOUT_SECS")]
    pub compose_timeout_secs: Option<u64>,

    /// Log line format: text or json
    #[arg(long, env = "STRATO_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// OTLP/HTTP endpoint to export traces to
    #[arg(long, env = "STRATO_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint
    #[arg(long, env = "STRATO_OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args)]
pub struct ClusterArgs {
    /// Cluster name, used for the compose project, file and container names
    #[arg(long)]
    pub name: ClusterName,

    /// Kafka version, e.g. 3.7.0. The zookeeper topology needs a 3.x release.
    #[arg(long)]
    pub version: String,

    /// Broker wiring: zookeeper, kraft or kraft-split
    #[arg(long, default_value_t = Topology::Kraft)]
    pub topology: Topology,

    /// Number of brokers (1-9)
    #[arg(long, default_value_t = DEFAULT_BROKERS)]
    pub brokers: usize,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a cluster's compose file and start it
    Create {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Overwrite an existing cluster with the same name
        #[arg(long)]
        force: bool,

        /// Only write files, do not run compose
        #[arg(long)]
        no_start: bool,
    },
    /// Print the compose file a cluster would get, without writing it
    Render {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Start a previously created cluster
    Up {
        name: ClusterName,
    },
    /// Stop a cluster
    Down {
        name: ClusterName,

        /// Also delete the compose file and broker data
        #[arg(long)]
        purge: bool,
    },
    /// List created clusters
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one cluster's manifest
    Show {
        name: ClusterName,
    },
}
