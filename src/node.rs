use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::auth::{Authenticator, TokenStore};
use crate::config::{QueueConfig, ResourceConfig};
use crate::error::Result;
use crate::grpc::{GrpcConnector, ResourceServer};
use crate::scheduler::{Hooks, Queue};
use crate::tls::TlsIdentity;
use crate::tools::builtin_registry;
use crate::worker::ResourceAgent;

/// The control plane process: queue, keeper and JSON API.
pub struct QueueNode {
    pub config: QueueConfig,
    pub queue: Arc<Queue>,
    authenticator: Arc<dyn Authenticator>,
}

impl QueueNode {
    pub fn new(
        config: QueueConfig,
        authenticator: Arc<dyn Authenticator>,
        tls_identity: Option<TlsIdentity>,
    ) -> Self {
        let connector = GrpcConnector::from_config(&config, tls_identity);
        Self {
            queue: Arc::new(
                Queue::new(Arc::new(connector)).with_hooks(Hooks::new(config.hooks.clone())),
            ),
            config,
            authenticator,
        }
    }

    /// Run until `shutdown` fires, then quit every job still on a resource.
    ///
    /// Resources listed in the config that cannot be reached are logged and
    /// skipped; an operator can add them later through the API.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        for entry in &self.config.resources {
            match self
                .queue
                .add_resource(&entry.address, &entry.name, &entry.auth_token)
                .await
            {
                Ok(id) => tracing::info!(%id, name = %entry.name, "Registered resource"),
                Err(e) => tracing::error!(
                    name = %entry.name,
                    address = %entry.address,
                    error = %e,
                    "Failed to register resource"
                ),
            }
        }

        let keeper_cancel = shutdown.child_token();
        let keeper = tokio::spawn(
            self.queue
                .clone()
                .run_keeper(self.config.keeper_interval, keeper_cancel.clone()),
        );

        let state = ApiState {
            queue: self.queue.clone(),
            tokens: Arc::new(TokenStore::new()),
            authenticator: self.authenticator.clone(),
        };
        let served = run_api(self.config.api_addr, state, shutdown.clone()).await;

        keeper_cancel.cancel();
        if let Err(e) = keeper.await {
            tracing::error!(error = %e, "Keeper task panicked");
        }

        tracing::info!("Quitting remaining jobs");
        for err in self.queue.quit().await {
            tracing::warn!(error = %err, "Job did not quit cleanly");
        }
        served
    }
}

/// A resource agent process: the agent behind its gRPC server.
pub struct ResourceNode {
    config: ResourceConfig,
    agent: Arc<ResourceAgent>,
    tls_identity: Option<TlsIdentity>,
}

impl ResourceNode {
    pub fn new(
        name: impl Into<String>,
        config: ResourceConfig,
        tls_identity: Option<TlsIdentity>,
    ) -> Result<Self> {
        let agent = ResourceAgent::from_config(name, &config, &builtin_registry())?;
        Ok(Self {
            config,
            agent: Arc::new(agent),
            tls_identity,
        })
    }

    pub fn agent(&self) -> Arc<ResourceAgent> {
        self.agent.clone()
    }

    /// Serve until `shutdown` fires, then stop every local task.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let server = ResourceServer::new(
            self.config.listen_addr,
            self.agent.clone(),
            self.tls_identity,
        );
        let served = server.run(shutdown).await;
        self.agent.shutdown().await;
        served
    }
}
