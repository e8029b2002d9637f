use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use crate::topology::Topology;

pub type Result<T, E = StratoError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StratoError {
    #[error("invalid cluster name '{name}': {reason}")]
    InvalidClusterName { name: String, reason: &'static str },

    #[error("invalid port range [{start}, {end}]")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("invalid kafka version '{0}'")]
    InvalidVersion(String),

    #[error("kafka version '{version}' has no image for the {topology} topology")]
    UnsupportedVersion { version: String, topology: Topology },

    #[error("broker count {0} out of range, expected 1..=9")]
    InvalidBrokerCount(usize),

    #[error("no free port left in range [{start}, {end}] ({in_use} in use)")]
    PortsExhausted { start: u16, end: u16, in_use: usize },

    #[error("cluster '{0}' already exists, pass --force to overwrite")]
    ClusterExists(String),

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compose exited with {status}: {stderr}")]
    ComposeFailed { status: ExitStatus, stderr: String },

    #[error("compose did not finish within {0:?}")]
    ComposeTimeout(Duration),
}

impl StratoError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
