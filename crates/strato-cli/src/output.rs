use strato_common::{ClusterManifest, ClusterPorts};
use strato_compose::ProvisionedCluster;

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn print_ports(ports: &ClusterPorts) {
    println!("  Brokers:    {}", ports.bootstrap_servers());
    println!("  Kafdrop UI: http://localhost:{}", ports.ui);
    if let Some(zk) = ports.zookeeper {
        println!("  ZooKeeper:  localhost:{zk}");
    }
}

pub fn print_created(out: &ProvisionedCluster) {
    let m = &out.manifest;
    if out.started {
        println!("✓ Cluster '{}' started ({} brokers, {})", m.name, m.ports.brokers.len(), m.topology);
    } else {
        println!("✓ Cluster '{}' written ({} brokers, {})", m.name, m.ports.brokers.len(), m.topology);
    }
    println!("  Compose:    {}", m.compose_file.display());
    print_ports(&m.ports);
}

pub fn print_manifest(m: &ClusterManifest) {
    println!("\n=== Cluster {} ===", m.name);
    println!("  Version:    {}", m.version);
    println!("  Topology:   {}", m.topology);
    println!("  Created:    {}", m.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Compose:    {}", m.compose_file.display());
    print_ports(&m.ports);
    println!();
}

pub fn print_clusters(clusters: &[ClusterManifest]) {
    println!("\n=== Kafka Clusters ===\n");
    if clusters.is_empty() {
        println!("No clusters found.");
        return;
    }
    println!(
        "{:<25} {:<12} {:<12} {:<24} {:<8}",
        "Name", "Version", "Topology", "Broker Ports", "UI"
    );
    println!("{:-<85}", "");
    for m in clusters {
        println!(
            "{:<25} {:<12} {:<12} {:<24} {:<8}",
            m.name.as_str(),
            m.version,
            m.topology.as_str(),
            join_ports(&m.ports.brokers),
            m.ports.ui
        );
    }
    println!();
}
