//! Whole processes: a `ResourceNode` and a `QueueNode` wired over gRPC.

mod test_harness;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use hashfleet::auth::StaticAuthenticator;
use hashfleet::config::{
    QueueConfig, ResourceConfig, ResourceEntry, TimerConfig, ToolsConfig, UsersConfig,
};
use hashfleet::job::{Job, JobStatus};
use hashfleet::node::{QueueNode, ResourceNode};
use test_harness::assert_eventually;

async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_nodes_run_jobs_and_shut_down_cleanly() {
    let work_dir = TempDir::new().unwrap();
    let resource_addr = free_addr().await;
    let shutdown = CancellationToken::new();

    let resource_config = ResourceConfig {
        listen_addr: resource_addr,
        auth_token: "integration".to_string(),
        tools: ToolsConfig {
            work_dir: work_dir.path().to_path_buf(),
            timer: Some(TimerConfig::default()),
            ..ToolsConfig::default()
        },
        ..ResourceConfig::default()
    };
    let resource = ResourceNode::new("worker-1", resource_config, None).unwrap();
    let agent = resource.agent();
    let resource_task = tokio::spawn(resource.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let queue_config = QueueConfig {
        resources: vec![ResourceEntry {
            name: "worker-1".to_string(),
            address: resource_addr.to_string(),
            auth_token: "integration".to_string(),
        }],
        ..QueueConfig::new(free_addr().await).with_keeper_interval(Duration::from_millis(50))
    };
    let node = QueueNode::new(
        queue_config,
        Arc::new(StaticAuthenticator::new(UsersConfig::default())),
        None,
    );
    let queue = node.queue.clone();
    let queue_task = tokio::spawn(node.run(shutdown.clone()));

    let q = queue.clone();
    assert_eventually(
        || {
            let q = q.clone();
            async move { !q.get_resources().await.is_empty() }
        },
        Duration::from_secs(5),
        "Configured resource was never registered",
    )
    .await;

    let tool_id = *queue.tools().await.keys().next().unwrap();
    let short = queue
        .add_job(
            Job::new(tool_id, "short", "tester")
                .with_parameter("seconds", "1")
                .with_parameter("result", "Success"),
        )
        .await
        .unwrap();

    let q = queue.clone();
    assert_eventually(
        || {
            let q = q.clone();
            async move { q.job_info(short).await.unwrap().status == JobStatus::Done }
        },
        Duration::from_secs(10),
        "Short job never finished",
    )
    .await;

    let long = queue
        .add_job(
            Job::new(tool_id, "long", "tester")
                .with_parameter("seconds", "3600")
                .with_parameter("result", "Success"),
        )
        .await
        .unwrap();
    assert_eq!(
        queue.job_info(long).await.unwrap().status,
        JobStatus::Running
    );

    // The queue quits what is still running before it exits.
    shutdown.cancel();
    queue_task.await.unwrap().unwrap();
    assert_eq!(queue.job_info(long).await.unwrap().status, JobStatus::Quit);

    resource_task.await.unwrap().unwrap();
    assert_eq!(agent.ping("integration").await.unwrap().tasks, 0);
}

#[tokio::test]
async fn test_resource_node_requires_a_token() {
    let work_dir = TempDir::new().unwrap();
    let config = ResourceConfig {
        tools: ToolsConfig {
            work_dir: work_dir.path().to_path_buf(),
            timer: Some(TimerConfig::default()),
            ..ToolsConfig::default()
        },
        ..ResourceConfig::default()
    };
    assert!(ResourceNode::new("worker", config, None).is_err());
}
