use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::error::Result;
use crate::grpc::resource_service::ResourceServiceImpl;
use crate::proto::resource_service_server::ResourceServiceServer;
use crate::tls::TlsIdentity;
use crate::worker::ResourceAgent;

/// Serves one agent's `ResourceService`.
pub struct ResourceServer {
    addr: SocketAddr,
    agent: Arc<ResourceAgent>,
    tls_identity: Option<TlsIdentity>,
}

impl ResourceServer {
    pub fn new(
        addr: SocketAddr,
        agent: Arc<ResourceAgent>,
        tls_identity: Option<TlsIdentity>,
    ) -> Self {
        Self {
            addr,
            agent,
            tls_identity,
        }
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let service = ResourceServiceServer::new(ResourceServiceImpl::new(self.agent.clone()));

        let mut builder = Server::builder();
        if let Some(ref tls_identity) = self.tls_identity {
            builder = builder.tls_config(tls_identity.server_tls_config())?;
        }

        tracing::info!(
            addr = %local_addr,
            name = self.agent.name(),
            tls = self.tls_identity.is_some(),
            "Starting resource gRPC server"
        );

        builder
            .add_service(service)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled())
            .await?;

        tracing::info!(addr = %local_addr, "Resource gRPC server stopped");
        Ok(())
    }
}
