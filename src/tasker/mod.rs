//! Task supervision on a resource agent.
//!
//! A [`Tooler`] describes one tool the agent can run and builds a
//! [`Tasker`] per job. A tasker owns the live execution of exactly one job
//! and walks it through the job state machine:
//!
//! ```text
//! created -> running <-> paused
//!     \         |          /
//!      +-> done | failed | quit
//! ```
//!
//! # Components
//!
//! - [`ProcessTasker`]: generic supervisor for an external tool process,
//!   parameterised by a [`ToolProcess`] strategy (arguments, output parsing,
//!   exit semantics)
//! - [`throughput`]: keeps a job's speed series in one unit
//! - [`ToolRegistry`]: maps a tool kind to the constructor of its tooler

pub mod process;
pub mod throughput;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::config::ToolsConfig;
use crate::error::Result;
use crate::job::Job;
use crate::tool::Tool;

pub use process::{ProcessTasker, ToolProcess};

/// Live handle on one job. All methods are serialized per tasker.
#[async_trait]
pub trait Tasker: Send + Sync {
    /// Fold any new tool output into the job and return a snapshot.
    async fn status(&self) -> Job;

    /// Start the job, or resume it after a pause. Fails on a finished job.
    async fn run(&self) -> Result<()>;

    /// Stop the tool so that a later `run` can continue where it left off.
    /// Returns once the tool has fully stopped.
    async fn pause(&self) -> Result<()>;

    /// Stop the tool for good. Returns the final snapshot; repeated calls
    /// return the same frozen snapshot.
    async fn quit(&self) -> Job;

    /// Raw standard streams of the current run, if any.
    async fn ioe(&self) -> Option<TaskIo>;
}

/// Standard streams of a running task.
///
/// Output is broadcast, so subscribers never compete with the tasker's own
/// progress parsing.
pub struct TaskIo {
    pub stdin: mpsc::UnboundedSender<Vec<u8>>,
    pub stdout: broadcast::Receiver<String>,
    pub stderr: broadcast::Receiver<String>,
}

/// Descriptor and task factory for one tool.
pub trait Tooler: Send + Sync {
    fn tool(&self) -> &Tool;

    /// Validate the job's parameters and prepare a tasker for it.
    fn new_task(&self, job: Job) -> Result<Box<dyn Tasker>>;
}

/// Builds a tooler from the agent's tool configuration. Returns `Ok(None)`
/// when the tool is not configured on this agent.
pub type ToolerFactory = fn(&ToolsConfig) -> Result<Option<Arc<dyn Tooler>>>;

/// Tool kinds known to an agent binary.
#[derive(Default)]
pub struct ToolRegistry {
    factories: BTreeMap<&'static str, ToolerFactory>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &'static str, factory: ToolerFactory) -> &mut Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Instantiate every configured tool.
    pub fn build(&self, config: &ToolsConfig) -> Result<Vec<Arc<dyn Tooler>>> {
        let mut toolers = Vec::new();
        for (kind, factory) in &self.factories {
            match factory(config)? {
                Some(tooler) => {
                    tracing::info!(
                        kind,
                        tool_id = %tooler.tool().id,
                        version = %tooler.tool().version,
                        "Tool enabled"
                    );
                    toolers.push(tooler);
                }
                None => tracing::debug!(kind, "Tool not configured"),
            }
        }
        Ok(toolers)
    }
}
