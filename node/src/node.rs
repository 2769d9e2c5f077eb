//! LCAP node supervisor: wires configuration, peer history, content and
//! transport into a running poll service and takes it down again.

use std::sync::Arc;
use std::time::Duration;

use lcap_poller::{ContentSource, IdentityManager, Transport};
use lcap_types::PeerId;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::content::DirContentSource;
use crate::identity::PeerRegistry;
use crate::metrics::PollMetrics;
use crate::service::{PollService, PollServiceHandle, ServiceParts};
use crate::shutdown::ShutdownController;
use crate::status;
use crate::transport::LoopbackHub;
use crate::NodeError;

/// How long [`LcapNode::stop`] waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LcapNode {
    config: NodeConfig,
    local: PeerId,
    handle: PollServiceHandle,
    shutdown: ShutdownController,
    metrics: Option<Arc<PollMetrics>>,
    registry: Option<Arc<PeerRegistry>>,
    hub: Option<LoopbackHub>,
    task_handles: Vec<JoinHandle<()>>,
}

impl LcapNode {
    /// Start a node from `config`, reachable through `hub`.
    ///
    /// Peer history is loaded from `identity_file` when one is configured and
    /// every archival unit directory must exist.
    pub async fn start(config: NodeConfig, hub: &LoopbackHub) -> Result<Self, NodeError> {
        config.validate()?;
        let local = config.local_peer()?;
        let peers = config.peer_ids()?;
        let registry = Arc::new(match &config.identity_file {
            Some(path) => PeerRegistry::open(local.clone(), peers, path)?,
            None => PeerRegistry::new(local.clone(), peers),
        });
        let content = DirContentSource::from_config(&config.archival_units, config.hash_bytes_per_ms)?;
        let transport = Arc::new(hub.transport(local.clone()));

        let mut node = Self::launch(
            config,
            Arc::clone(&registry) as Arc<dyn IdentityManager>,
            Arc::new(content),
            transport,
        )?;
        node.registry = Some(registry);
        hub.register(local, node.handle.mailbox());
        node.hub = Some(hub.clone());
        Ok(node)
    }

    /// Start a node with caller-supplied collaborators.
    pub async fn start_with(
        config: NodeConfig,
        identity: Arc<dyn IdentityManager>,
        content: Arc<dyn ContentSource>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        Self::launch(config, identity, content, transport)
    }

    fn launch(
        config: NodeConfig,
        identity: Arc<dyn IdentityManager>,
        content: Arc<dyn ContentSource>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NodeError> {
        let metrics = if config.enable_metrics {
            Some(Arc::new(PollMetrics::new()?))
        } else {
            None
        };
        let local = identity.local_identity();
        let shutdown = ShutdownController::new();
        let parts = ServiceParts {
            engine: config.engine(),
            identity,
            content,
            transport,
            metrics: metrics.clone(),
            mailbox_capacity: config.mailbox_capacity,
            housekeeping: Duration::from_secs(config.housekeeping_secs),
        };
        let (handle, task_handles) = PollService::start(parts, &shutdown)?;
        tracing::info!(
            node = %local,
            aus = config.archival_units.len(),
            peers = config.peers.len(),
            metrics = config.enable_metrics,
            "LCAP node started"
        );
        Ok(Self {
            config,
            local,
            handle,
            shutdown,
            metrics,
            registry: None,
            hub: None,
            task_handles,
        })
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn handle(&self) -> PollServiceHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> Option<&Arc<PollMetrics>> {
        self.metrics.as_ref()
    }

    pub async fn status_json(&self) -> Result<String, NodeError> {
        status::to_json(&self.handle.snapshot().await?)
    }

    pub async fn status_text(&self) -> Result<String, NodeError> {
        Ok(status::render_text(&self.handle.snapshot().await?))
    }

    /// Stop the node.
    ///
    /// Leaves the hub first so no new messages arrive, signals every task,
    /// waits for them (bounded by [`SHUTDOWN_TIMEOUT`]) and persists peer
    /// history.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!(node = %self.local, "LCAP node stopping");
        if let Some(hub) = self.hub.take() {
            hub.unregister(&self.local);
        }
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let timed_out = tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err();

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.save() {
                tracing::error!(error = %e, "failed to persist peer history");
            }
        }
        if timed_out {
            tracing::warn!("shutdown timeout ({:?}), some tasks may still be running", SHUTDOWN_TIMEOUT);
            return Err(NodeError::ShutdownTimeout);
        }
        tracing::info!(node = %self.local, "LCAP node stopped");
        Ok(())
    }
}
