//! tonic plumbing for the queue to resource channel.
//!
//! - [`ResourceServer`] / [`ResourceServiceImpl`]: agent side
//! - [`GrpcConnector`] / [`GrpcResourceClient`]: queue side, implementing
//!   [`ResourceHandle`](crate::scheduler::ResourceHandle)

pub mod client;
pub mod resource_service;
pub mod server;

pub use client::{GrpcConnector, GrpcResourceClient};
pub use resource_service::ResourceServiceImpl;
pub use server::ResourceServer;
