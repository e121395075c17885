pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod grpc;
pub mod job;
pub mod node;
pub mod proto;
pub mod scheduler;
pub mod shutdown;
pub mod tasker;
pub mod tls;
pub mod tool;
pub mod tools;
pub mod worker;
