use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Broker wiring used when rendering a cluster.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Brokers coordinated by a single ZooKeeper node.
    Zookeeper,
    /// KRaft, every node runs combined broker+controller roles and carries a
    /// CONTROLLER listener next to its client listeners.
    #[default]
    Kraft,
    /// KRaft, one dedicated controller node; brokers only carry client
    /// listeners.
    KraftSplit,
}

impl Topology {
    pub const ALL: [Topology; 3] = [Topology::Zookeeper, Topology::Kraft, Topology::KraftSplit];

    pub fn as_str(self) -> &'static str {
        match self {
            Topology::Zookeeper => "zookeeper",
            Topology::Kraft => "kraft",
            Topology::KraftSplit => "kraft-split",
        }
    }

    pub fn uses_zookeeper(self) -> bool {
        matches!(self, Topology::Zookeeper)
    }

    /// Host ports one cluster of `brokers` nodes needs.
    pub fn required_ports(self, brokers: usize) -> usize {
        brokers + 1 + usize::from(self.uses_zookeeper())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zookeeper" | "zk" => Ok(Topology::Zookeeper),
            "kraft" => Ok(Topology::Kraft),
            "kraft-split" => Ok(Topology::KraftSplit),
            other => Err(format!(
                "unknown topology '{}', available: zookeeper, kraft, kraft-split",
                other
            )),
        }
    }
}
