use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use strato_common::{ClusterManifest, ClusterName, Result, StratoError};

use crate::document::ComposeFile;

pub const COMPOSE_DIR: &str = "compose_files";
pub const CLUSTERS_DIR: &str = "kafka_clusters";
const MANIFEST_FILE: &str = "cluster.json";

/// On-disk layout of a work directory:
///
/// ```text
/// <root>/compose_files/<name>.yml
/// <root>/kafka_clusters/<name>/cluster.json
/// <root>/kafka_clusters/<name>/data/
/// ```
#[derive(Debug, Clone)]
pub struct ClusterStore {
    root: PathBuf,
}

impl ClusterStore {
    /// Open (and create if needed) a work directory. The root is made
    /// absolute so volume paths in compose files do not depend on where
    /// compose resolves relative paths from.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .await
            .map_err(|e| StratoError::io(root, e))?;
        let root = fs::canonicalize(root)
            .await
            .map_err(|e| StratoError::io(root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compose_path(&self, name: &ClusterName) -> PathBuf {
        self.root.join(COMPOSE_DIR).join(format!("{name}.yml"))
    }

    pub fn cluster_dir(&self, name: &ClusterName) -> PathBuf {
        self.root.join(CLUSTERS_DIR).join(name.as_str())
    }

    pub fn data_dir(&self, name: &ClusterName) -> PathBuf {
        self.cluster_dir(name).join("data")
    }

    pub fn manifest_path(&self, name: &ClusterName) -> PathBuf {
        self.cluster_dir(name).join(MANIFEST_FILE)
    }

    /// True if either the compose file or the manifest of `name` exists.
    pub async fn exists(&self, name: &ClusterName) -> Result<bool> {
        for path in [self.compose_path(name), self.manifest_path(name)] {
            if fs::try_exists(&path)
                .await
                .map_err(|e| StratoError::io(&path, e))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Create the compose and data directories for `name`.
    pub async fn prepare(&self, name: &ClusterName) -> Result<()> {
        for dir in [self.root.join(COMPOSE_DIR), self.data_dir(name)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StratoError::io(&dir, e))?;
        }
        Ok(())
    }

    pub async fn write_compose(&self, name: &ClusterName, file: &ComposeFile) -> Result<PathBuf> {
        let path = self.compose_path(name);
        let yaml = file.to_yaml()?;
        fs::write(&path, yaml)
            .await
            .map_err(|e| StratoError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "wrote compose file");
        Ok(path)
    }

    pub async fn write_manifest(&self, manifest: &ClusterManifest) -> Result<PathBuf> {
        let path = self.manifest_path(&manifest.name);
        let json = serde_json::to_vec_pretty(manifest)?;
        fs::write(&path, json)
            .await
            .map_err(|e| StratoError::io(&path, e))?;
        Ok(path)
    }

    pub async fn load_manifest(&self, name: &ClusterName) -> Result<ClusterManifest> {
        let path = self.manifest_path(name);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StratoError::ClusterNotFound(name.to_string()))
            }
            Err(e) => return Err(StratoError::io(&path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every readable manifest, sorted by cluster name. Directories whose
    /// name or manifest is invalid are skipped with a warning.
    pub async fn list_manifests(&self) -> Result<Vec<ClusterManifest>> {
        let dir = self.root.join(CLUSTERS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StratoError::io(&dir, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StratoError::io(&dir, e))?
        {
            let file_name = entry.file_name();
            let Ok(name) = ClusterName::new(file_name.to_string_lossy()) else {
                tracing::warn!(dir = ?file_name, "skipping directory with invalid cluster name");
                continue;
            };
            match self.load_manifest(&name).await {
                Ok(m) => out.push(m),
                Err(StratoError::ClusterNotFound(_)) => {}
                Err(e) => tracing::warn!(cluster = %name, error = %e, "skipping unreadable manifest"),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Delete the compose file and the cluster directory, data included.
    pub async fn remove(&self, name: &ClusterName) -> Result<()> {
        let compose = self.compose_path(name);
        match fs::remove_file(&compose).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StratoError::io(&compose, e)),
        }
        let dir = self.cluster_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StratoError::io(&dir, e)),
        }
        Ok(())
    }
}
