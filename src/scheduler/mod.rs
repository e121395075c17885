//! Queue control plane.
//!
//! # Components
//!
//! - [`JobStack`]: ordered jobs, with validated full-permutation reorder
//! - [`ResourcePool`]: connected agents, their slots, and the de-duplicated
//!   tool catalog
//! - [`Queue`]: assignment, job/queue/resource operations, reconciliation
//! - [`ResourceHandle`] / [`ResourceConnector`]: how the queue talks to
//!   agents, over gRPC or in process
//! - [`Hooks`]: webhooks and programs notified of job and queue events
//!
//! # Assignment
//!
//! Whenever capacity may have freed up the queue walks the stack front to
//! back. A created job goes to the first active resource that offers its
//! tool and has the tool's hardware slot free; a paused job may only
//! resume on the resource holding its session. Jobs that fit nowhere are
//! skipped, not blocking the rest. An unreachable resource is paused and
//! the job stays queued for another one.

pub mod handle;
pub mod hooks;
pub mod pool;
pub mod queue;
pub mod stack;

pub use handle::{ResourceConnector, ResourceHandle};
pub use hooks::{HookEvent, Hooks};
pub use pool::{Resource, ResourceInfo, ResourcePool, ResourceStatus};
pub use queue::{Queue, NO_TOOL_AVAILABLE};
pub use stack::JobStack;
