use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The subset of the Compose file format the generator emits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeFile {
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Network>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub image: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

impl Service {
    pub fn env(mut self, key: &str, value: impl ToString) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    pub fn publish(mut self, host: u16, container: u16) -> Self {
        self.ports.push(format!("{host}:{container}"));
        self
    }

    /// Host side of every published port. Entries that do not parse as
    /// `host:container` are skipped.
    pub fn host_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter_map(|p| p.split_once(':'))
            .filter_map(|(host, _)| host.parse().ok())
            .collect()
    }
}

impl ComposeFile {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn container_names(&self) -> Vec<&str> {
        self.services
            .values()
            .map(|s| s.container_name.as_str())
            .collect()
    }

    pub fn host_ports(&self) -> Vec<u16> {
        self.services.values().flat_map(Service::host_ports).collect()
    }
}
