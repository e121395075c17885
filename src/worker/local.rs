//! In-process resources, for embedding an agent next to the queue and for
//! tests that do not want a network hop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::job::Job;
use crate::scheduler::{ResourceConnector, ResourceHandle};
use crate::tool::Tool;
use crate::worker::{AgentStatus, ResourceAgent};

pub struct LocalResource {
    agent: Arc<ResourceAgent>,
    auth_token: String,
}

impl LocalResource {
    pub fn new(agent: Arc<ResourceAgent>, auth_token: impl Into<String>) -> Self {
        Self {
            agent,
            auth_token: auth_token.into(),
        }
    }
}

#[async_trait]
impl ResourceHandle for LocalResource {
    async fn ping(&self) -> Result<AgentStatus> {
        self.agent.ping(&self.auth_token).await
    }

    async fn hardware(&self) -> Result<BTreeMap<String, bool>> {
        self.agent.hardware(&self.auth_token).await
    }

    async fn tools(&self) -> Result<Vec<Tool>> {
        self.agent.tools(&self.auth_token).await
    }

    async fn add_task(&self, job: &Job) -> Result<Job> {
        self.agent.add_task(&self.auth_token, job.clone()).await
    }

    async fn task_status(&self, job: &Job) -> Result<Job> {
        self.agent.task_status(&self.auth_token, job.id).await
    }

    async fn task_run(&self, job: &Job) -> Result<Job> {
        self.agent.task_run(&self.auth_token, job.id).await
    }

    async fn task_pause(&self, job: &Job) -> Result<Job> {
        self.agent.task_pause(&self.auth_token, job.id).await
    }

    async fn task_quit(&self, job: &Job) -> Result<Job> {
        self.agent.task_quit(&self.auth_token, job.id).await
    }

    async fn all_task_status(&self) -> Result<Vec<Job>> {
        self.agent.all_task_status(&self.auth_token).await
    }
}

/// Resolves addresses to agents living in this process.
#[derive(Default)]
pub struct LocalConnector {
    agents: HashMap<String, Arc<ResourceAgent>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, address: impl Into<String>, agent: Arc<ResourceAgent>) -> Self {
        self.agents.insert(address.into(), agent);
        self
    }
}

#[async_trait]
impl ResourceConnector for LocalConnector {
    async fn connect(&self, address: &str, auth_token: &str) -> Result<Arc<dyn ResourceHandle>> {
        let agent = self
            .agents
            .get(address)
            .cloned()
            .ok_or_else(|| Error::Unavailable(format!("no agent at {}", address)))?;
        Ok(Arc::new(LocalResource::new(agent, auth_token)))
    }
}
