use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ResourceConfig;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::tasker::{Tasker, ToolRegistry, Tooler};
use crate::tool::Tool;

/// Identity and load reported by a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub name: String,
    pub version: String,
    pub tasks: usize,
}

/// Per-worker job map and the operations the queue drives it with.
///
/// Every operation checks the caller's token first. Taskers are invoked
/// while holding the map's write lock, so dispatch on one agent is
/// serialized; the taskers' own processes run concurrently.
pub struct ResourceAgent {
    name: String,
    auth_token: String,
    toolers: RwLock<HashMap<Uuid, Arc<dyn Tooler>>>,
    hardware: RwLock<BTreeMap<String, bool>>,
    tasks: RwLock<HashMap<Uuid, Box<dyn Tasker>>>,
}

impl ResourceAgent {
    pub fn new(
        name: impl Into<String>,
        auth_token: impl Into<String>,
        hardware: &[String],
        toolers: Vec<Arc<dyn Tooler>>,
    ) -> Self {
        Self {
            name: name.into(),
            auth_token: auth_token.into(),
            toolers: RwLock::new(
                toolers
                    .into_iter()
                    .map(|tooler| (tooler.tool().id, tooler))
                    .collect(),
            ),
            hardware: RwLock::new(hardware.iter().map(|tag| (tag.clone(), true)).collect()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Build an agent with every tool of `registry` that `config` enables.
    pub fn from_config(
        name: impl Into<String>,
        config: &ResourceConfig,
        registry: &ToolRegistry,
    ) -> Result<Self> {
        if config.auth_token.is_empty() {
            return Err(Error::Config("resource auth token must not be empty".into()));
        }
        std::fs::create_dir_all(&config.tools.work_dir)?;
        let toolers = registry.build(&config.tools)?;
        if toolers.is_empty() {
            tracing::warn!("No tools configured; this resource will never receive jobs");
        }
        Ok(Self::new(
            name,
            config.auth_token.clone(),
            &config.tools.hardware,
            toolers,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authenticate(&self, token: &str) -> Result<()> {
        if token != self.auth_token {
            tracing::warn!("Rejected call with a bad auth token");
            return Err(Error::Authentication);
        }
        Ok(())
    }

    pub async fn ping(&self, token: &str) -> Result<AgentStatus> {
        self.authenticate(token)?;
        Ok(AgentStatus {
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tasks: self.tasks.read().await.len(),
        })
    }

    pub async fn hardware(&self, token: &str) -> Result<BTreeMap<String, bool>> {
        self.authenticate(token)?;
        Ok(self.hardware.read().await.clone())
    }

    pub async fn tools(&self, token: &str) -> Result<Vec<Tool>> {
        self.authenticate(token)?;
        let mut tools: Vec<Tool> = self
            .toolers
            .read()
            .await
            .values()
            .map(|tooler| tooler.tool().clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    /// Build a tasker for `job`, keep it in the map and start it.
    ///
    /// A failed start is returned as an error but the task stays in the
    /// map so its failed state remains queryable.
    pub async fn add_task(&self, token: &str, job: Job) -> Result<Job> {
        self.authenticate(token)?;
        let tooler = self
            .toolers
            .read()
            .await
            .get(&job.tool_id)
            .cloned()
            .ok_or(Error::ToolNotFound(job.tool_id))?;

        let job_id = job.id;
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&job_id) {
            return Err(Error::InvalidParameter(format!(
                "job {} is already on this resource",
                job_id
            )));
        }
        let tasker = tooler.new_task(job)?;
        let tasker = tasks.entry(job_id).or_insert(tasker);

        tracing::info!(job_id = %job_id, tool = %tooler.tool().name, "Starting task");
        if let Err(e) = tasker.run().await {
            tracing::error!(job_id = %job_id, error = %e, "Task failed to start");
            return Err(e);
        }
        Ok(tasker.status().await)
    }

    pub async fn task_status(&self, token: &str, job_id: Uuid) -> Result<Job> {
        self.authenticate(token)?;
        let tasks = self.tasks.write().await;
        let tasker = tasks.get(&job_id).ok_or(Error::JobNotFound(job_id))?;
        Ok(tasker.status().await)
    }

    pub async fn task_run(&self, token: &str, job_id: Uuid) -> Result<Job> {
        self.authenticate(token)?;
        let tasks = self.tasks.write().await;
        let tasker = tasks.get(&job_id).ok_or(Error::JobNotFound(job_id))?;
        tasker.run().await?;
        tracing::info!(job_id = %job_id, "Task resumed");
        Ok(tasker.status().await)
    }

    /// Pause a task. A task that cannot be paused is quit so it never
    /// lingers in an unknown state; the pause error is still returned.
    pub async fn task_pause(&self, token: &str, job_id: Uuid) -> Result<Job> {
        self.authenticate(token)?;
        let tasks = self.tasks.write().await;
        let tasker = tasks.get(&job_id).ok_or(Error::JobNotFound(job_id))?;
        if let Err(e) = tasker.pause().await {
            tracing::warn!(job_id = %job_id, error = %e, "Pause failed, quitting task");
            tasker.quit().await;
            return Err(e);
        }
        tracing::info!(job_id = %job_id, "Task paused");
        Ok(tasker.status().await)
    }

    /// Quit a task and forget it. The final snapshot is returned.
    pub async fn task_quit(&self, token: &str, job_id: Uuid) -> Result<Job> {
        self.authenticate(token)?;
        let mut tasks = self.tasks.write().await;
        let tasker = tasks.remove(&job_id).ok_or(Error::JobNotFound(job_id))?;
        let job = tasker.quit().await;
        tracing::info!(job_id = %job_id, status = %job.status, "Task removed");
        Ok(job)
    }

    pub async fn all_task_status(&self, token: &str) -> Result<Vec<Job>> {
        self.authenticate(token)?;
        let tasks = self.tasks.write().await;
        let mut jobs = Vec::with_capacity(tasks.len());
        for tasker in tasks.values() {
            jobs.push(tasker.status().await);
        }
        Ok(jobs)
    }

    /// Quit every task. Used when the agent process exits.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.tasks.write().await.drain().collect();
        for (job_id, tasker) in drained {
            let job = tasker.quit().await;
            tracing::info!(job_id = %job_id, status = %job.status, "Task stopped on shutdown");
        }
    }
}
