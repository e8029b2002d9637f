use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StratoError;
use crate::topology::Topology;

const MAX_NAME_LEN: usize = 63;

/// A cluster name that is safe to use as a compose project name, a file stem
/// and a container name prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterName(String);

impl ClusterName {
    pub fn new(name: impl Into<String>) -> Result<Self, StratoError> {
        let name = name.into();
        let reject = |reason| {
            Err(StratoError::InvalidClusterName {
                name: name.clone(),
                reason,
            })
        };

        if name.is_empty() {
            return reject("must not be empty");
        }
        if name.len() > MAX_NAME_LEN {
            return reject("longer than 63 characters");
        }
        if name.contains(['/', '\\']) {
            return reject("must not contain path separators");
        }
        let first = name.as_bytes()[0];
        if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
            return reject("must start with a lowercase letter or digit");
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
        {
            return reject("only lowercase letters, digits, '-' and '_' are allowed");
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClusterName {
    type Err = StratoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for ClusterName {
    type Error = StratoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClusterName> for String {
    fn from(value: ClusterName) -> Self {
        value.0
    }
}

impl AsRef<str> for ClusterName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Host ports handed out to one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterPorts {
    pub brokers: Vec<u16>,
    pub ui: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<u16>,
}

impl ClusterPorts {
    pub fn all(&self) -> Vec<u16> {
        let mut out = self.brokers.clone();
        out.push(self.ui);
        out.extend(self.zookeeper);
        out
    }

    /// Bootstrap servers as seen from the host.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers
            .iter()
            .map(|p| format!("localhost:{p}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Record of a generated cluster, stored next to its data directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterManifest {
    pub name: ClusterName,
    pub version: String,
    pub topology: Topology,
    pub ports: ClusterPorts,
    pub compose_file: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ClusterManifest {
    pub fn ui_url(&self) -> String {
        format!("http://localhost:{}", self.ports.ui)
    }
}
