use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::job::Job;
use crate::tool::Tool;
use crate::worker::AgentStatus;

/// The queue's view of one connected resource agent.
///
/// Task calls carry the whole job; agents key on its id. Implementations
/// bound every call with a timeout so a hung agent cannot stall the queue.
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    async fn ping(&self) -> Result<AgentStatus>;
    async fn hardware(&self) -> Result<BTreeMap<String, bool>>;
    async fn tools(&self) -> Result<Vec<Tool>>;
    async fn add_task(&self, job: &Job) -> Result<Job>;
    async fn task_status(&self, job: &Job) -> Result<Job>;
    async fn task_run(&self, job: &Job) -> Result<Job>;
    async fn task_pause(&self, job: &Job) -> Result<Job>;
    async fn task_quit(&self, job: &Job) -> Result<Job>;
    async fn all_task_status(&self) -> Result<Vec<Job>>;
}

/// Dials resource agents for the queue.
#[async_trait]
pub trait ResourceConnector: Send + Sync {
    async fn connect(&self, address: &str, auth_token: &str) -> Result<Arc<dyn ResourceHandle>>;
}
