//! Renders Kafka cluster compose documents for the supported topologies.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use uuid::Uuid;

use strato_common::{ClusterName, ClusterPorts, Result, StratoError, Topology};

use crate::document::{ComposeFile, Network, Service};

pub const MAX_BROKERS: usize = 9;
pub const DEFAULT_BROKERS: usize = 3;

const KAFKA_IMAGE: &str = "apache/kafka";
const CP_KAFKA_IMAGE: &str = "confluentinc/cp-kafka";
const CP_ZOOKEEPER_IMAGE: &str = "confluentinc/cp-zookeeper";
const KAFDROP_IMAGE: &str = "obsidiandynamics/kafdrop:latest";

const INTERNAL_PORT: u16 = 19092;
const EXTERNAL_PORT: u16 = 9092;
const CONTROLLER_PORT: u16 = 9093;
const ZOOKEEPER_PORT: u16 = 2181;
const KAFDROP_PORT: u16 = 9000;
const DATA_MOUNT: &str = "/var/lib/kafka/data";
const CONTROLLER_NODE_ID: usize = 100;
const RESTART: &str = "unless-stopped";

/// What to build: one named cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRequest {
    pub name: ClusterName,
    pub version: String,
    pub topology: Topology,
    pub brokers: usize,
}

impl ClusterRequest {
    pub fn new(name: ClusterName, version: impl Into<String>) -> Self {
        Self {
            name,
            version: version.into(),
            topology: Topology::default(),
            brokers: DEFAULT_BROKERS,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_brokers(mut self, brokers: usize) -> Self {
        self.brokers = brokers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BROKERS).contains(&self.brokers) {
            return Err(StratoError::InvalidBrokerCount(self.brokers));
        }
        validate_version(&self.version)?;
        if self.topology.uses_zookeeper() && confluent_tag(&self.version).is_none() {
            return Err(StratoError::UnsupportedVersion {
                version: self.version.clone(),
                topology: self.topology,
            });
        }
        Ok(())
    }

    pub fn required_ports(&self) -> usize {
        self.topology.required_ports(self.brokers)
    }

    /// Split a flat list of allocated ports into broker, UI and ZooKeeper
    /// ports. `ports` must hold exactly [`ClusterRequest::required_ports`].
    pub fn assign_ports(&self, ports: &[u16]) -> Option<ClusterPorts> {
        if ports.len() != self.required_ports() {
            return None;
        }
        let (brokers, rest) = ports.split_at(self.brokers);
        Some(ClusterPorts {
            brokers: brokers.to_vec(),
            ui: rest[0],
            zookeeper: rest.get(1).copied(),
        })
    }
}

/// Image tags use `[A-Za-z0-9_.-]`, at most 128 chars, and cannot start with
/// `.` or `-`.
fn validate_version(version: &str) -> Result<()> {
    let ok = !version.is_empty()
        && version.len() <= 128
        && !version.starts_with(['.', '-'])
        && version
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if ok {
        Ok(())
    } else {
        Err(StratoError::InvalidVersion(version.to_string()))
    }
}

/// Confluent Platform tag shipping Kafka `version`. CP 7.M bundles Kafka
/// 3.M; Kafka 4 dropped ZooKeeper, so only 3.x maps.
pub fn confluent_tag(version: &str) -> Option<String> {
    let mut parts = version.split('.');
    let (major, minor) = (parts.next()?, parts.next()?);
    if let Some(patch) = parts.next() {
        patch.parse::<u32>().ok()?;
    }
    if major != "3" || parts.next().is_some() {
        return None;
    }
    let minor: u32 = minor.parse().ok()?;
    (minor <= 9).then(|| format!("7.{minor}.0"))
}

fn cp_image(image: &str, version: &str) -> String {
    let tag = confluent_tag(version).unwrap_or_else(|| version.to_string());
    format!("{image}:{tag}")
}

/// KRaft cluster id derived from the cluster name: the 16 bytes of a name
/// based UUID, base64url without padding.
pub fn kraft_cluster_id(name: &ClusterName) -> String {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_str().as_bytes());
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

pub fn network_name(name: &ClusterName) -> String {
    format!("{name}-net")
}

fn broker_key(n: usize) -> String {
    format!("kafka-{n}")
}

fn broker_host(name: &ClusterName, n: usize) -> String {
    format!("{name}-kafka-{n}")
}

/// Build the compose document for `req`. `data_dir` is where broker data
/// directories are mounted from.
pub fn render(req: &ClusterRequest, ports: &ClusterPorts, data_dir: &Path) -> ComposeFile {
    let mut file = ComposeFile::default();
    let net = network_name(&req.name);
    file.networks.insert(
        net.clone(),
        Network {
            name: Some(net.clone()),
            driver: Some("bridge".to_string()),
        },
    );

    let brokers = ports.brokers.len();
    for (idx, host_port) in ports.brokers.iter().copied().enumerate() {
        let n = idx + 1;
        let svc = match req.topology {
            Topology::Zookeeper => zookeeper_broker(req, n, host_port, brokers),
            Topology::Kraft => kraft_combined_broker(req, n, host_port, brokers),
            Topology::KraftSplit => kraft_broker_only(req, n, host_port, brokers),
        };
        let svc = Service {
            volumes: vec![format!("{}:{DATA_MOUNT}", broker_data_dir(data_dir, n).display())],
            networks: vec![net.clone()],
            restart: Some(RESTART.to_string()),
            ..svc
        };
        file.services.insert(broker_key(n), svc);
    }

    match req.topology {
        Topology::Zookeeper => {
            if let Some(zk_port) = ports.zookeeper {
                file.services.insert(
                    "zookeeper".to_string(),
                    zookeeper_node(req, zk_port, &net),
                );
            }
        }
        Topology::KraftSplit => {
            file.services
                .insert("controller".to_string(), kraft_controller(req, data_dir, &net));
        }
        Topology::Kraft => {}
    }

    file.services
        .insert("kafdrop".to_string(), kafdrop(req, ports, &net));
    file
}

pub fn broker_data_dir(data_dir: &Path, n: usize) -> PathBuf {
    data_dir.join(broker_key(n))
}

fn base_service(image: String, container: String) -> Service {
    Service {
        image,
        hostname: Some(container.clone()),
        container_name: container,
        ..Default::default()
    }
}

fn earlier_brokers(n: usize) -> Vec<String> {
    (1..n).map(broker_key).collect()
}

fn with_replication(svc: Service, brokers: usize) -> Service {
    let rf = brokers.min(3);
    let min_isr = if brokers >= 3 { 2 } else { 1 };
    svc.env("KAFKA_OFFSETS_TOPIC_REPLICATION_FACTOR", rf)
        .env("KAFKA_TRANSACTION_STATE_LOG_REPLICATION_FACTOR", rf)
        .env("KAFKA_TRANSACTION_STATE_LOG_MIN_ISR", min_isr)
        .env("KAFKA_GROUP_INITIAL_REBALANCE_DELAY_MS", 0)
}

fn client_listeners(svc: Service, host: &str, host_port: u16) -> Service {
    svc.env(
        "KAFKA_ADVERTISED_LISTENERS",
        format!("INTERNAL://{host}:{INTERNAL_PORT},EXTERNAL://localhost:{host_port}"),
    )
    .env("KAFKA_INTER_BROKER_LISTENER_NAME", "INTERNAL")
    .publish(host_port, EXTERNAL_PORT)
}

fn zookeeper_broker(req: &ClusterRequest, n: usize, host_port: u16, brokers: usize) -> Service {
    let host = broker_host(&req.name, n);
    let mut depends_on = vec!["zookeeper".to_string()];
    depends_on.extend(earlier_brokers(n));

    let svc = base_service(cp_image(CP_KAFKA_IMAGE, &req.version), host.clone())
        .env("KAFKA_BROKER_ID", n)
        .env(
            "KAFKA_ZOOKEEPER_CONNECT",
            format!("{}-zookeeper:{ZOOKEEPER_PORT}", req.name),
        )
        .env(
            "KAFKA_LISTENERS",
            format!("INTERNAL://0.0.0.0:{INTERNAL_PORT},EXTERNAL://0.0.0.0:{EXTERNAL_PORT}"),
        )
        .env(
            "KAFKA_LISTENER_SECURITY_PROTOCOL_MAP",
            "INTERNAL:PLAINTEXT,EXTERNAL:PLAINTEXT",
        )
        .env("KAFKA_LOG_DIRS", DATA_MOUNT);
    let svc = with_replication(client_listeners(svc, &host, host_port), brokers);
    Service { depends_on, ..svc }
}

fn quorum_voters(req: &ClusterRequest, brokers: usize) -> String {
    (1..=brokers)
        .map(|n| format!("{n}@{}:{CONTROLLER_PORT}", broker_host(&req.name, n)))
        .collect::<Vec<_>>()
        .join(",")
}

fn controller_host(name: &ClusterName) -> String {
    format!("{name}-controller")
}

fn kraft_common(req: &ClusterRequest, svc: Service) -> Service {
    svc.env("KAFKA_CONTROLLER_LISTENER_NAMES", "CONTROLLER")
        .env(
            "KAFKA_LISTENER_SECURITY_PROTOCOL_MAP",
            "INTERNAL:PLAINTEXT,EXTERNAL:PLAINTEXT,CONTROLLER:PLAINTEXT",
        )
        .env("KAFKA_LOG_DIRS", DATA_MOUNT)
        .env("CLUSTER_ID", kraft_cluster_id(&req.name))
}

fn kraft_combined_broker(req: &ClusterRequest, n: usize, host_port: u16, brokers: usize) -> Service {
    let host = broker_host(&req.name, n);
    let svc = base_service(format!("{KAFKA_IMAGE}:{}", req.version), host.clone())
        .env("KAFKA_NODE_ID", n)
        .env("KAFKA_PROCESS_ROLES", "broker,controller")
        .env(
            "KAFKA_LISTENERS",
            format!(
                "INTERNAL://:{INTERNAL_PORT},EXTERNAL://:{EXTERNAL_PORT},CONTROLLER://:{CONTROLLER_PORT}"
            ),
        )
        .env("KAFKA_CONTROLLER_QUORUM_VOTERS", quorum_voters(req, brokers));
    let svc = with_replication(client_listeners(kraft_common(req, svc), &host, host_port), brokers);
    Service {
        depends_on: earlier_brokers(n),
        ..svc
    }
}

fn kraft_broker_only(req: &ClusterRequest, n: usize, host_port: u16, brokers: usize) -> Service {
    let host = broker_host(&req.name, n);
    let svc = base_service(format!("{KAFKA_IMAGE}:{}", req.version), host.clone())
        .env("KAFKA_NODE_ID", n)
        .env("KAFKA_PROCESS_ROLES", "broker")
        .env(
            "KAFKA_LISTENERS",
            format!("INTERNAL://:{INTERNAL_PORT},EXTERNAL://:{EXTERNAL_PORT}"),
        )
        .env(
            "KAFKA_CONTROLLER_QUORUM_VOTERS",
            format!("{CONTROLLER_NODE_ID}@{}:{CONTROLLER_PORT}", controller_host(&req.name)),
        );
    let svc = with_replication(client_listeners(kraft_common(req, svc), &host, host_port), brokers);
    Service {
        depends_on: vec!["controller".to_string()],
        ..svc
    }
}

fn kraft_controller(req: &ClusterRequest, data_dir: &Path, net: &str) -> Service {
    let host = controller_host(&req.name);
    let svc = base_service(format!("{KAFKA_IMAGE}:{}", req.version), host)
        .env("KAFKA_NODE_ID", CONTROLLER_NODE_ID)
        .env("KAFKA_PROCESS_ROLES", "controller")
        .env("KAFKA_LISTENERS", format!("CONTROLLER://:{CONTROLLER_PORT}"))
        .env(
            "KAFKA_CONTROLLER_QUORUM_VOTERS",
            format!("{CONTROLLER_NODE_ID}@{}:{CONTROLLER_PORT}", controller_host(&req.name)),
        );
    let svc = kraft_common(req, svc);
    Service {
        volumes: vec![format!("{}:{DATA_MOUNT}", data_dir.join("controller").display())],
        networks: vec![net.to_string()],
        restart: Some(RESTART.to_string()),
        ..svc
    }
}

fn zookeeper_node(req: &ClusterRequest, zk_port: u16, net: &str) -> Service {
    let svc = base_service(
        cp_image(CP_ZOOKEEPER_IMAGE, &req.version),
        format!("{}-zookeeper", req.name),
    )
    .env("ZOOKEEPER_CLIENT_PORT", ZOOKEEPER_PORT)
    .env("ZOOKEEPER_TICK_TIME", 2000)
    .publish(zk_port, ZOOKEEPER_PORT);
    Service {
        networks: vec![net.to_string()],
        restart: Some(RESTART.to_string()),
        ..svc
    }
}

fn kafdrop(req: &ClusterRequest, ports: &ClusterPorts, net: &str) -> Service {
    let connect = (1..=ports.brokers.len())
        .map(|n| format!("{}:{INTERNAL_PORT}", broker_host(&req.name, n)))
        .collect::<Vec<_>>()
        .join(",");
    let svc = Service {
        image: KAFDROP_IMAGE.to_string(),
        container_name: format!("{}-kafdrop", req.name),
        ..Default::default()
    }
    .env("KAFKA_BROKERCONNECT", connect)
    .env("JVM_OPTS", "-Xms32M -Xmx64M")
    .env("SERVER_PORT", KAFDROP_PORT)
    .publish(ports.ui, KAFDROP_PORT);
    Service {
        networks: vec![net.to_string()],
        depends_on: (1..=ports.brokers.len()).map(broker_key).collect(),
        restart: Some(RESTART.to_string()),
        ..svc
    }
}
