pub mod document;
pub mod generator;
pub mod ports;
pub mod provision;
pub mod runner;
pub mod store;

pub use document::{ComposeFile, Network, Service};
pub use generator::{render, ClusterRequest, DEFAULT_BROKERS, MAX_BROKERS};
pub use ports::{PortAllocator, PortRange};
pub use provision::{CreateOptions, ProvisionedCluster, Provisioner};
pub use runner::{CliComposeRunner, ComposeCommand, ComposeRunner};
pub use store::ClusterStore;
