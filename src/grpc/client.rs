use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::proto::resource_service_client::ResourceServiceClient;
use crate::proto::{AuthRequest, TaskRequest};
use crate::scheduler::{ResourceConnector, ResourceHandle};
use crate::tls::TlsIdentity;
use crate::tool::Tool;
use crate::worker::AgentStatus;

/// Queue-side stub for one resource agent.
pub struct GrpcResourceClient {
    address: String,
    auth_token: String,
    client: ResourceServiceClient<Channel>,
}

impl GrpcResourceClient {
    fn auth(&self) -> Request<AuthRequest> {
        Request::new(AuthRequest {
            auth_token: self.auth_token.clone(),
        })
    }

    fn task(&self, job: &Job) -> Request<TaskRequest> {
        Request::new(TaskRequest::new(&self.auth_token, job))
    }

    fn log_failure(&self, call: &'static str, err: &Error) {
        if err.is_unavailable() {
            tracing::warn!(address = %self.address, call, error = %err, "Resource unreachable");
        } else {
            tracing::debug!(address = %self.address, call, error = %err, "Resource call failed");
        }
    }
}

#[async_trait]
impl ResourceHandle for GrpcResourceClient {
    async fn ping(&self) -> Result<AgentStatus> {
        let resp = self
            .client
            .clone()
            .ping(self.auth())
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("Ping", e))?
            .into_inner();
        Ok(AgentStatus {
            name: resp.name,
            version: resp.version,
            tasks: resp.tasks as usize,
        })
    }

    async fn hardware(&self) -> Result<BTreeMap<String, bool>> {
        let resp = self
            .client
            .clone()
            .resource_hardware(self.auth())
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("ResourceHardware", e))?;
        Ok(resp.into_inner().hardware)
    }

    async fn tools(&self) -> Result<Vec<Tool>> {
        let resp = self
            .client
            .clone()
            .resource_tools(self.auth())
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("ResourceTools", e))?;
        resp.into_inner()
            .tools
            .into_iter()
            .map(Tool::try_from)
            .collect()
    }

    async fn add_task(&self, job: &Job) -> Result<Job> {
        self.client
            .clone()
            .add_task(self.task(job))
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("AddTask", e))?
            .into_inner()
            .into_job()
    }

    async fn task_status(&self, job: &Job) -> Result<Job> {
        self.client
            .clone()
            .task_status(self.task(job))
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("TaskStatus", e))?
            .into_inner()
            .into_job()
    }

    async fn task_run(&self, job: &Job) -> Result<Job> {
        self.client
            .clone()
            .task_run(self.task(job))
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("TaskRun", e))?
            .into_inner()
            .into_job()
    }

    async fn task_pause(&self, job: &Job) -> Result<Job> {
        self.client
            .clone()
            .task_pause(self.task(job))
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("TaskPause", e))?
            .into_inner()
            .into_job()
    }

    async fn task_quit(&self, job: &Job) -> Result<Job> {
        self.client
            .clone()
            .task_quit(self.task(job))
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("TaskQuit", e))?
            .into_inner()
            .into_job()
    }

    async fn all_task_status(&self) -> Result<Vec<Job>> {
        let resp = self
            .client
            .clone()
            .all_task_status(self.auth())
            .await
            .map_err(Error::from)
            .inspect_err(|e| self.log_failure("AllTaskStatus", e))?;
        resp.into_inner()
            .jobs
            .into_iter()
            .map(Job::try_from)
            .collect()
    }
}

/// Dials agents over tonic, with mTLS when an identity is configured.
pub struct GrpcConnector {
    tls_identity: Option<TlsIdentity>,
    connect_timeout: Duration,
    rpc_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(
        tls_identity: Option<TlsIdentity>,
        connect_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            tls_identity,
            connect_timeout,
            rpc_timeout,
        }
    }

    pub fn from_config(config: &QueueConfig, tls_identity: Option<TlsIdentity>) -> Self {
        Self::new(tls_identity, config.connect_timeout, config.rpc_timeout)
    }

    async fn create_channel(&self, address: &str) -> Result<Channel> {
        let uri = if self.tls_identity.is_some() {
            format!("https://{}", address)
        } else {
            format!("http://{}", address)
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::InvalidParameter(format!("Invalid endpoint {}: {}", address, e)))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.rpc_timeout);

        let endpoint = match &self.tls_identity {
            Some(tls_identity) => endpoint.tls_config(tls_identity.client_tls_config())?,
            None => endpoint,
        };

        endpoint
            .connect()
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to connect to {}: {}", address, e)))
    }
}

#[async_trait]
impl ResourceConnector for GrpcConnector {
    async fn connect(&self, address: &str, auth_token: &str) -> Result<Arc<dyn ResourceHandle>> {
        let channel = self.create_channel(address).await?;
        tracing::debug!(address, "Connected to resource");
        Ok(Arc::new(GrpcResourceClient {
            address: address.to_string(),
            auth_token: auth_token.to_string(),
            client: ResourceServiceClient::new(channel),
        }))
    }
}
