//! Host runtime: one per home directory.

pub mod constants;
pub mod layout;
pub mod lock;
pub mod options;

use std::path::PathBuf;
use std::sync::Arc;

use crate::bootstrap::{Bootstrap, BootstrapKind};
use crate::db::{Database, SqliteRepository};
use crate::disk::DiskFormat;
use crate::errors::{VmhostError, VmhostResult};
use crate::images::Image;
use crate::instance::Instance;
use crate::logging::init_logging_for;
use crate::net::{Network, NetworkSpec};
use crate::orchestrator::{InstanceOrchestrator, Repositories};
use crate::task::TaskTracker;

use layout::HostLayout;
use lock::RuntimeLock;
use options::HostOptions;

/// A running vmhost: layout, database, orchestrator and the home lock.
pub struct VmHost {
    layout: HostLayout,
    options: HostOptions,
    orchestrator: InstanceOrchestrator,
    db: Database,
    /// Held for the lifetime of the host; prevents two processes on one home.
    _runtime_lock: RuntimeLock,
}

impl VmHost {
    /// Open (or initialize) the home directory described by `options`.
    ///
    /// Prepares the layout, installs logging, takes the home lock, opens
    /// the database and recovers persisted instances.
    pub async fn open(options: HostOptions) -> VmhostResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(VmhostError::Config(format!(
                "home_dir must be absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = HostLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            VmhostError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;

        let runtime_lock = RuntimeLock::acquire(&layout.lock_path())?;

        let db = Database::open(&layout.db_path()).map_err(|e| {
            VmhostError::Storage(format!(
                "Failed to initialize database at {}: {}",
                layout.db_path().display(),
                e
            ))
        })?;

        let repos = Repositories {
            instances: Arc::new(SqliteRepository::new(db.clone())),
            disks: Arc::new(SqliteRepository::new(db.clone())),
            networks: Arc::new(SqliteRepository::new(db.clone())),
            bootstraps: Arc::new(SqliteRepository::new(db.clone())),
            images: Arc::new(SqliteRepository::new(db.clone())),
        };

        let orchestrator =
            InstanceOrchestrator::new(layout.clone(), options.clone(), TaskTracker::new(), repos);

        let host = Self {
            layout,
            options,
            orchestrator,
            db,
            _runtime_lock: runtime_lock,
        };

        tracing::debug!(home = %host.layout.home_dir().display(), "Opened vmhost");
        host.recover_instances().await?;
        Ok(host)
    }

    /// Re-attach to hypervisors that outlived the previous host process.
    async fn recover_instances(&self) -> VmhostResult<()> {
        let instances = self.orchestrator.list().await?;
        let total = instances.len();
        let mut running = 0;

        for instance in instances {
            let id = instance.id.clone();
            match self.orchestrator.recover(instance).await {
                Ok(instance) if instance.is_running() => running += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(instance_id = %id, "Failed to recover instance: {}", e),
            }
        }

        tracing::info!(total, running, "Recovered instances");
        Ok(())
    }

    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    pub fn orchestrator(&self) -> &InstanceOrchestrator {
        &self.orchestrator
    }

    pub fn tracker(&self) -> &TaskTracker {
        self.orchestrator.tracker()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    pub async fn create_network(&self, spec: NetworkSpec) -> VmhostResult<Network> {
        let network = Network::create(spec)?;
        self.orchestrator.repos().networks.create(network).await
    }

    pub async fn create_bootstrap(
        &self,
        name: impl Into<String>,
        kind: BootstrapKind,
        content: impl Into<String>,
    ) -> VmhostResult<Bootstrap> {
        let bootstrap = Bootstrap::new(name, kind, content)?;
        self.orchestrator.repos().bootstraps.create(bootstrap).await
    }

    /// Register an image file. Relative paths resolve against `images/`.
    pub async fn register_image(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: DiskFormat,
    ) -> VmhostResult<Image> {
        let path = path.into();
        let path = if path.is_absolute() {
            path
        } else {
            self.layout.images_dir().join(path)
        };
        let image = Image::register(name, path, format)?;
        self.orchestrator.repos().images.create(image).await
    }

    pub async fn instances(&self) -> VmhostResult<Vec<Instance>> {
        self.orchestrator.list().await
    }

    /// Stop every running instance concurrently.
    ///
    /// Failures are logged; the first one is returned after all stops ran.
    pub async fn shutdown(&self) -> VmhostResult<()> {
        let results = self.orchestrator.stop_all().await;
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                tracing::warn!("Failed to stop instance during shutdown: {}", e);
                first_error.get_or_insert(e);
            }
        }
        tracing::info!("vmhost shut down");
        first_error.map_or(Ok(()), Err)
    }
}
