//! Resource agent: the worker side of the fleet.
//!
//! An agent hosts the toolers configured for its machine and keeps a map of
//! job id to [`Tasker`](crate::tasker::Tasker) for every job the queue has
//! handed it and not yet purged.
//!
//! # Components
//!
//! - [`ResourceAgent`]: token-checked task operations over the job map
//! - [`local`]: in-process [`ResourceHandle`](crate::scheduler::ResourceHandle)
//!   adapter around an agent
//!
//! The network face of the agent lives in [`crate::grpc`].

pub mod agent;
pub mod local;

pub use agent::{AgentStatus, ResourceAgent};
pub use local::{LocalConnector, LocalResource};
