use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use strato_common::{ClusterManifest, ClusterName, ClusterPorts, Result, StratoError};

use crate::document::ComposeFile;
use crate::generator::{render, ClusterRequest};
use crate::ports::PortAllocator;
use crate::runner::ComposeRunner;
use crate::store::ClusterStore;

#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Replace an existing cluster of the same name. The old stack is
    /// brought down before its files are overwritten.
    pub force: bool,
    /// Run `compose up` after writing the files.
    pub start: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            force: false,
            start: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionedCluster {
    pub manifest: ClusterManifest,
    pub compose: ComposeFile,
    pub started: bool,
}

/// Allocates ports, renders and writes compose files and starts clusters.
#[derive(Clone)]
pub struct Provisioner {
    store: ClusterStore,
    ports: PortAllocator,
    runner: Arc<dyn ComposeRunner>,
    creating: Arc<Mutex<HashSet<ClusterName>>>,
}

/// Holds a cluster name for the duration of one `create`.
struct CreateClaim {
    name: ClusterName,
    creating: Arc<Mutex<HashSet<ClusterName>>>,
}

impl Drop for CreateClaim {
    fn drop(&mut self) {
        let mut creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        creating.remove(&self.name);
    }
}

impl Provisioner {
    pub fn new(store: ClusterStore, ports: PortAllocator, runner: Arc<dyn ComposeRunner>) -> Self {
        Self {
            store,
            ports,
            runner,
            creating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, name: &ClusterName) -> Option<CreateClaim> {
        let mut creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        if !creating.insert(name.clone()) {
            return None;
        }
        Some(CreateClaim {
            name: name.clone(),
            creating: self.creating.clone(),
        })
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Reserve the ports of every cluster already recorded in the store so
    /// this process does not hand them out again. Returns the number of
    /// clusters seen.
    pub async fn seed_from_store(&self) -> Result<usize> {
        let manifests = self.store.list_manifests().await?;
        for m in &manifests {
            self.ports.reserve(m.ports.all()).await;
        }
        tracing::debug!(clusters = manifests.len(), "reserved ports of existing clusters");
        Ok(manifests.len())
    }

    async fn allocate(&self, req: &ClusterRequest) -> Result<ClusterPorts> {
        let flat = self.ports.allocate_many(req.required_ports()).await?;
        match req.assign_ports(&flat) {
            Some(ports) => Ok(ports),
            None => {
                self.release(&flat).await;
                Err(StratoError::PortsExhausted {
                    start: self.ports.range().start(),
                    end: self.ports.range().end(),
                    in_use: self.ports.in_use().await,
                })
            }
        }
    }

    async fn release(&self, ports: &[u16]) {
        for port in ports {
            self.ports.release(*port).await;
        }
    }

    /// Render the compose document for `req` without writing anything. The
    /// ports shown are returned to the pool afterwards.
    pub async fn preview(&self, req: &ClusterRequest) -> Result<(ClusterPorts, ComposeFile)> {
        req.validate()?;
        let ports = self.allocate(req).await?;
        let compose = render(req, &ports, &self.store.data_dir(&req.name));
        self.release(&ports.all()).await;
        Ok((ports, compose))
    }

    pub async fn create(&self, req: &ClusterRequest, opts: CreateOptions) -> Result<ProvisionedCluster> {
        req.validate()?;
        let name = &req.name;

        // a concurrent create of the same name counts as an existing cluster
        let Some(_claim) = self.claim(name) else {
            return Err(StratoError::ClusterExists(name.to_string()));
        };

        let previous = if self.store.exists(name).await? {
            if !opts.force {
                return Err(StratoError::ClusterExists(name.to_string()));
            }
            let previous = self.store.load_manifest(name).await.ok();
            let old_file = previous
                .as_ref()
                .map(|m| m.compose_file.clone())
                .unwrap_or_else(|| self.store.compose_path(name));
            if tokio::fs::try_exists(&old_file).await.unwrap_or(false) {
                tracing::warn!(cluster = %name, "stopping existing cluster before overwriting it");
                self.runner.down(name, &old_file).await?;
            }
            previous
        } else {
            None
        };

        let ports = self.allocate(req).await?;
        let written = self.write(req, &ports).await;
        let (manifest, compose) = match written {
            Ok(v) => v,
            Err(e) => {
                self.release(&ports.all()).await;
                return Err(e);
            }
        };

        if let Some(prev) = previous {
            let keep = ports.all();
            let stale: Vec<u16> = prev.ports.all().into_iter().filter(|p| !keep.contains(p)).collect();
            self.release(&stale).await;
        }

        tracing::info!(
            cluster = %name,
            topology = %req.topology,
            version = %req.version,
            brokers = ?ports.brokers,
            ui = ports.ui,
            compose_file = %manifest.compose_file.display(),
            "cluster files written"
        );

        if opts.start {
            self.runner.up(name, &manifest.compose_file).await?;
            tracing::info!(cluster = %name, ui_url = %manifest.ui_url(), "cluster started");
        }

        Ok(ProvisionedCluster {
            manifest,
            compose,
            started: opts.start,
        })
    }

    async fn write(
        &self,
        req: &ClusterRequest,
        ports: &ClusterPorts,
    ) -> Result<(ClusterManifest, ComposeFile)> {
        self.store.prepare(&req.name).await?;
        let compose = render(req, ports, &self.store.data_dir(&req.name));
        let compose_file = self.store.write_compose(&req.name, &compose).await?;
        let manifest = ClusterManifest {
            name: req.name.clone(),
            version: req.version.clone(),
            topology: req.topology,
            ports: ports.clone(),
            compose_file,
            created_at: Utc::now(),
        };
        self.store.write_manifest(&manifest).await?;
        Ok((manifest, compose))
    }

    /// Start a previously created cluster again.
    pub async fn up(&self, name: &ClusterName) -> Result<ClusterManifest> {
        let manifest = self.store.load_manifest(name).await?;
        self.runner.up(name, &manifest.compose_file).await?;
        Ok(manifest)
    }

    /// Stop a cluster and return its ports to the pool. With `purge` the
    /// compose file and data directory are deleted too.
    pub async fn destroy(&self, name: &ClusterName, purge: bool) -> Result<ClusterManifest> {
        let manifest = self.store.load_manifest(name).await?;
        self.runner.down(name, &manifest.compose_file).await?;
        self.release(&manifest.ports.all()).await;
        if purge {
            self.store.remove(name).await?;
            tracing::info!(cluster = %name, "cluster files removed");
        }
        Ok(manifest)
    }

    pub async fn get(&self, name: &ClusterName) -> Result<ClusterManifest> {
        self.store.load_manifest(name).await
    }

    pub async fn list(&self) -> Result<Vec<ClusterManifest>> {
        self.store.list_manifests().await
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use strato_common::Topology;
    use tokio::sync::Mutex;

    use super::*;
    use crate::ports::PortRange;

    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<(&'static str, String, PathBuf)>>,
        fail_up: bool,
        fail_down: bool,
    }

    impl FakeRunner {
        async fn record(
            &self,
            action: &'static str,
            project: &ClusterName,
            file: &Path,
            fail: bool,
        ) -> Result<()> {
            self.calls
                .lock()
                .await
                .push((action, project.to_string(), file.to_path_buf()));
            if fail {
                return Err(StratoError::ComposeTimeout(std::time::Duration::from_secs(1)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ComposeRunner for FakeRunner {
        async fn up(&self, project: &ClusterName, file: &Path) -> Result<()> {
            self.record("up", project, file, self.fail_up).await
        }

        async fn down(&self, project: &ClusterName, file: &Path) -> Result<()> {
            self.record("down", project, file, self.fail_down).await
        }
    }

    async fn setup(runner: Arc<FakeRunner>) -> (tempfile::TempDir, Provisioner) {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterStore::open(dir.path()).await.unwrap();
        let ports = PortAllocator::new(PortRange::new(4000, 4019).unwrap());
        (dir, Provisioner::new(store, ports, runner))
    }

    fn request(name: &str) -> ClusterRequest {
        ClusterRequest::new(ClusterName::new(name).unwrap(), "3.7.0")
    }

    #[tokio::test]
    async fn test_create_writes_files_and_starts() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner.clone()).await;

        let out = prov.create(&request("demo"), CreateOptions::default()).await.unwrap();
        assert!(out.started);
        assert_eq!(out.manifest.ports.brokers.len(), 3);
        assert!(out.manifest.compose_file.exists());
        assert!(out.manifest.ui_url().starts_with("http://localhost:"));

        let on_disk = std::fs::read_to_string(&out.manifest.compose_file).unwrap();
        assert_eq!(ComposeFile::from_yaml(&on_disk).unwrap(), out.compose);

        let calls = runner.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "up");
        assert_eq!(calls[0].1, "demo");
        assert_eq!(calls[0].2, out.manifest.compose_file);
        assert_eq!(prov.ports().in_use().await, 4);
    }

    #[tokio::test]
    async fn test_name_collision_requires_force() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner).await;
        let opts = CreateOptions {
            force: false,
            start: false,
        };

        let first = prov.create(&request("demo"), opts).await.unwrap();
        let err = prov.create(&request("demo"), opts).await.unwrap_err();
        assert!(matches!(err, StratoError::ClusterExists(_)));

        let forced = CreateOptions { force: true, ..opts };
        let second = prov.create(&request("demo"), forced).await.unwrap();
        assert_ne!(first.manifest.ports, second.manifest.ports);
        // ports of the replaced cluster go back to the pool
        assert_eq!(prov.ports().in_use().await, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_create_same_name() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner).await;
        let opts = CreateOptions {
            force: false,
            start: false,
        };
        let req = request("demo");

        let (a, b) = tokio::join!(prov.create(&req, opts), prov.create(&req, opts));
        let (winner, err) = match (a, b) {
            (Ok(w), Err(e)) | (Err(e), Ok(w)) => (w, e),
            (a, b) => panic!("expected exactly one winner, got {:?} / {:?}", a.is_ok(), b.is_ok()),
        };
        assert!(matches!(err, StratoError::ClusterExists(_)));
        assert_eq!(prov.ports().in_use().await, 4);
        let recorded = prov.get(&req.name).await.unwrap();
        assert_eq!(recorded.ports, winner.manifest.ports);

        // the claim is dropped once create returns
        let forced = CreateOptions { force: true, ..opts };
        assert!(prov.create(&req, forced).await.is_ok());
    }

    #[tokio::test]
    async fn test_force_stops_old_stack_before_overwrite() {
        let runner = Arc::new(FakeRunner::default());
        let (dir, prov) = setup(runner.clone()).await;
        let first = prov.create(&request("demo"), CreateOptions::default()).await.unwrap();

        let replaced = prov
            .create(&request("demo"), CreateOptions { force: true, start: false })
            .await
            .unwrap();
        assert!(!replaced.started);

        {
            let calls = runner.calls.lock().await;
            let actions: Vec<&str> = calls.iter().map(|c| c.0).collect();
            assert_eq!(actions, vec!["up", "down"]);
            assert_eq!(calls[1].1, "demo");
            assert_eq!(calls[1].2, first.manifest.compose_file);
        }
        assert_eq!(prov.ports().in_use().await, 4);

        // a later process only reserves what the manifest now records
        let store = ClusterStore::open(dir.path()).await.unwrap();
        let ports = PortAllocator::new(PortRange::new(4000, 4019).unwrap());
        let fresh = Provisioner::new(store, ports, runner);
        fresh.seed_from_store().await.unwrap();
        let other = fresh
            .create(&request("other"), CreateOptions { force: false, start: false })
            .await
            .unwrap();
        let demo_ports = replaced.manifest.ports.all();
        assert!(other.manifest.ports.all().iter().all(|p| !demo_ports.contains(p)));
    }

    #[tokio::test]
    async fn test_force_aborts_when_old_stack_wont_stop() {
        let runner = Arc::new(FakeRunner {
            fail_down: true,
            ..Default::default()
        });
        let (_dir, prov) = setup(runner.clone()).await;
        let name = ClusterName::new("demo").unwrap();
        let first = prov.create(&request("demo"), CreateOptions::default()).await.unwrap();

        let forced = CreateOptions { force: true, start: true };
        assert!(prov.create(&request("demo"), forced).await.is_err());

        // nothing was overwritten and the old ports stay taken
        let recorded = prov.get(&name).await.unwrap();
        assert_eq!(recorded.ports, first.manifest.ports);
        assert_eq!(recorded.created_at, first.manifest.created_at);
        assert_eq!(prov.ports().in_use().await, 4);
        let actions: Vec<&str> = runner.calls.lock().await.iter().map(|c| c.0).collect();
        assert_eq!(actions, vec!["up", "down"]);
    }

    #[tokio::test]
    async fn test_clusters_never_share_ports() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner).await;
        let opts = CreateOptions {
            force: false,
            start: false,
        };

        let a = prov
            .create(&request("a").with_topology(Topology::Zookeeper), opts)
            .await
            .unwrap();
        let b = prov.create(&request("b"), opts).await.unwrap();
        let a_ports = a.manifest.ports.all();
        assert!(b.manifest.ports.all().iter().all(|p| !a_ports.contains(p)));
    }

    #[tokio::test]
    async fn test_seed_from_store_reserves_previous_ports() {
        let runner = Arc::new(FakeRunner::default());
        let (dir, prov) = setup(runner.clone()).await;
        let created = prov.create(&request("old"), CreateOptions::default()).await.unwrap();

        // a fresh process over the same work dir
        let store = ClusterStore::open(dir.path()).await.unwrap();
        let ports = PortAllocator::new(PortRange::new(4000, 4019).unwrap());
        let fresh = Provisioner::new(store, ports, runner);
        assert_eq!(fresh.seed_from_store().await.unwrap(), 1);
        assert_eq!(fresh.ports().in_use().await, 4);

        let next = fresh
            .create(&request("new"), CreateOptions { force: false, start: false })
            .await
            .unwrap();
        let old_ports = created.manifest.ports.all();
        assert!(next.manifest.ports.all().iter().all(|p| !old_ports.contains(p)));
    }

    #[tokio::test]
    async fn test_start_failure_leaves_files() {
        let runner = Arc::new(FakeRunner {
            fail_up: true,
            ..Default::default()
        });
        let (_dir, prov) = setup(runner).await;
        let err = prov.create(&request("demo"), CreateOptions::default()).await;
        assert!(err.is_err());

        let name = ClusterName::new("demo").unwrap();
        assert!(prov.store().compose_path(&name).exists());
        assert!(prov.get(&name).await.is_ok());
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_error() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner).await;
        let opts = CreateOptions {
            force: false,
            start: false,
        };
        // 20 ports, 4 per cluster
        for i in 0..5 {
            prov.create(&request(&format!("c{i}")), opts).await.unwrap();
        }
        let err = prov.create(&request("c5"), opts).await.unwrap_err();
        assert!(matches!(err, StratoError::PortsExhausted { .. }));
        assert!(!prov.store().compose_path(&ClusterName::new("c5").unwrap()).exists());
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner.clone()).await;
        let req = request("dry");
        let (ports, compose) = prov.preview(&req).await.unwrap();
        assert_eq!(compose.host_ports().len(), ports.all().len());
        assert!(!prov.store().exists(&req.name).await.unwrap());
        assert_eq!(prov.ports().in_use().await, 0);
        assert!(runner.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_and_purge() {
        let runner = Arc::new(FakeRunner::default());
        let (_dir, prov) = setup(runner.clone()).await;
        let name = ClusterName::new("demo").unwrap();
        prov.create(&request("demo"), CreateOptions::default()).await.unwrap();

        prov.up(&name).await.unwrap();
        prov.destroy(&name, true).await.unwrap();

        let actions: Vec<&str> = runner.calls.lock().await.iter().map(|c| c.0).collect();
        assert_eq!(actions, vec!["up", "up", "down"]);
        assert_eq!(prov.ports().in_use().await, 0);
        assert!(prov.list().await.unwrap().is_empty());
        assert!(matches!(
            prov.destroy(&name, false).await,
            Err(StratoError::ClusterNotFound(_))
        ));
    }
}
