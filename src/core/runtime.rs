//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: placement provider → store (opens placed partitions)
//! - Shutdown order: engine flush → partition teardown → placement

use crate::control::{MemPlacementProvider, MetaChange, MetaPlacementProvider, PlacementProvider};
use crate::core::config::Config;
use crate::engine::MemEngineFactory;
use crate::raft::{LocalNetwork, LocalReplicaFactory};
use crate::store::Store;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the placement change channel in meta mode.
const META_CHANGE_BUFFER: usize = 256;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Placement provider health.
    pub placement: ComponentHealth,
    /// Store health.
    pub store: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            placement: ComponentHealth::Starting,
            store: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.placement == ComponentHealth::Healthy && self.store == ComponentHealth::Healthy
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        self.placement != ComponentHealth::Failed && self.store != ComponentHealth::Failed
    }
}

/// Placement provider selected by configuration.
#[derive(Clone)]
pub enum Placement {
    Memory(Arc<MemPlacementProvider>),
    Meta(Arc<MetaPlacementProvider>),
}

impl Placement {
    fn provider(&self) -> Arc<dyn PlacementProvider> {
        match self {
            Self::Memory(p) => Arc::clone(p) as Arc<dyn PlacementProvider>,
            Self::Meta(p) => Arc::clone(p) as Arc<dyn PlacementProvider>,
        }
    }
}

/// partkv runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// In-process replication network shared by local partitions.
    network: Arc<LocalNetwork>,

    /// Placement provider, once started.
    placement: Option<Placement>,

    /// Placement change stream feeding the meta provider.
    meta_tx: Option<mpsc::Sender<MetaChange>>,

    /// Meta provider listener task.
    meta_listener: Option<JoinHandle<()>>,

    /// Store, once started.
    store: Option<Arc<Store>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            network: LocalNetwork::new(),
            placement: None,
            meta_tx: None,
            meta_listener: None,
            store: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the store (if started).
    pub fn store(&self) -> Option<&Arc<Store>> {
        self.store.as_ref()
    }

    /// Get the placement provider (if started).
    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    /// Sender feeding placement changes to the meta provider.
    pub fn meta_changes(&self) -> Option<mpsc::Sender<MetaChange>> {
        self.meta_tx.clone()
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            addr = %self.config.store.local_addr,
            placement = %self.config.placement.mode,
            "starting partkv runtime"
        );

        self.init_placement().await?;
        self.init_store().await?;

        self.running.store(true, Ordering::Release);
        tracing::info!("partkv runtime started");
        Ok(())
    }

    async fn init_placement(&mut self) -> Result<()> {
        tracing::debug!("initializing placement provider");
        let local = self.config.local_addr()?;
        let seed = self.config.placement_seed()?;

        let placement = if self.config.placement.mode == "meta" {
            let provider = Arc::new(MetaPlacementProvider::with_snapshot(local, seed));
            let (tx, rx) = mpsc::channel(META_CHANGE_BUFFER);
            self.meta_listener = Some(provider.spawn_listener(rx));
            self.meta_tx = Some(tx);
            Placement::Meta(provider)
        } else {
            let provider = Arc::new(MemPlacementProvider::new(local));
            for parts in seed.into_values() {
                for meta in parts.into_values() {
                    provider.add_part(meta.space_id, meta.part_id, meta.peers);
                }
            }
            Placement::Memory(provider)
        };

        self.placement = Some(placement);
        self.health.placement = ComponentHealth::Healthy;
        tracing::info!(mode = %self.config.placement.mode, "placement provider initialized");
        Ok(())
    }

    async fn init_store(&mut self) -> Result<()> {
        tracing::debug!("initializing store");
        let placement = self
            .placement
            .as_ref()
            .context("placement provider must start before the store")?
            .provider();

        let replicas = LocalReplicaFactory::new(Arc::clone(&self.network))
            .with_buffer_size(self.config.replication.append_buffer_size);
        let store = Store::new(
            self.config.store_options()?,
            placement,
            Arc::new(MemEngineFactory::new()),
            Arc::new(replicas),
        );
        if let Err(e) = store.init() {
            self.health.store = ComponentHealth::Failed;
            return Err(e).context("failed to open placed partitions");
        }

        tracing::info!(spaces = store.space_ids().len(), "store initialized");
        self.store = Some(store);
        self.health.store = ComponentHealth::Healthy;
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until ctrl-c or [`Runtime::shutdown`].
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping partkv runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.stop_store().await?;
        self.stop_placement().await;

        tracing::info!("partkv runtime stopped");
        Ok(())
    }

    async fn stop_store(&mut self) -> Result<()> {
        let Some(store) = self.store.take() else {
            return Ok(());
        };
        self.health.store = ComponentHealth::Stopping;

        let flushing = Arc::clone(&store);
        tokio::task::spawn_blocking(move || {
            for space in flushing.space_ids() {
                match flushing.flush(space) {
                    Ok(report) if !report.is_ok() => {
                        tracing::warn!(space, failed = report.failures().count(), "flush incomplete");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(space, error = %e, "flush failed"),
                }
            }
        })
        .await
        .context("engine flush task failed")?;

        for space in store.space_ids() {
            crate::control::LifecycleHandler::remove_space(store.as_ref(), space)
                .with_context(|| format!("failed to remove space {space}"))?;
        }

        self.health.store = ComponentHealth::Stopped;
        Ok(())
    }

    async fn stop_placement(&mut self) {
        self.health.placement = ComponentHealth::Stopping;
        self.meta_tx = None;
        // Senders handed out by `meta_changes` may outlive the runtime.
        if let Some(listener) = self.meta_listener.take() {
            listener.abort();
        }
        self.placement = None;
        self.health.placement = ComponentHealth::Stopped;
    }
}
