pub mod cluster;
pub mod error;
pub mod topology;

pub use cluster::{ClusterManifest, ClusterName, ClusterPorts};
pub use error::{Result, StratoError};
pub use topology::Topology;

pub mod telemetry;
