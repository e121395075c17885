//! Queue to agent traffic over a real tonic channel on localhost.

mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hashfleet::error::Error;
use hashfleet::grpc::{GrpcConnector, ResourceServer};
use hashfleet::job::{Job, JobStatus};
use hashfleet::scheduler::{Queue, ResourceConnector};
use test_harness::{timer_agent, wait_for, TICK, TOKEN};

fn plaintext_connector() -> GrpcConnector {
    GrpcConnector::new(None, Duration::from_secs(2), Duration::from_secs(10))
}

/// Serve a timer agent on an ephemeral port. Returns its address.
async fn spawn_agent(name: &str, shutdown: CancellationToken) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ResourceServer::new(addr, timer_agent(name), None);
    tokio::spawn(async move {
        let _ = server.serve_listener(listener, shutdown).await;
    });
    addr.to_string()
}

#[tokio::test]
async fn test_handshake_over_grpc() {
    let shutdown = CancellationToken::new();
    let address = spawn_agent("grpc-agent", shutdown.clone()).await;

    let handle = plaintext_connector().connect(&address, TOKEN).await.unwrap();
    let status = handle.ping().await.unwrap();
    assert_eq!(status.name, "grpc-agent");
    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(status.tasks, 0);

    let hardware = handle.hardware().await.unwrap();
    assert_eq!(hardware.get("cpu"), Some(&true));

    let tools = handle.tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "Timer Test Plugin");
    assert_eq!(tools[0].requirement, "cpu");

    shutdown.cancel();
}

#[tokio::test]
async fn test_errors_survive_the_wire() {
    let shutdown = CancellationToken::new();
    let address = spawn_agent("grpc-agent", shutdown.clone()).await;
    let connector = plaintext_connector();

    let bad = connector.connect(&address, "wrong").await.unwrap();
    assert!(matches!(bad.ping().await, Err(Error::Authentication)));

    let handle = connector.connect(&address, TOKEN).await.unwrap();
    let unknown = Job::new(Uuid::new_v4(), "ghost", "tester");
    assert!(matches!(
        handle.task_status(&unknown).await,
        Err(Error::JobNotFound(id)) if id == unknown.id
    ));

    // Unknown tool ids are not job lookups.
    let result = handle.add_task(&unknown).await;
    assert!(matches!(result, Err(Error::Remote(_))));

    let tool = handle.tools().await.unwrap().remove(0);
    let invalid = Job::new(tool.id, "timer", "tester").with_parameter("seconds", "0");
    assert!(matches!(
        handle.add_task(&invalid).await,
        Err(Error::InvalidParameter(_))
    ));

    shutdown.cancel();
}

#[tokio::test]
async fn test_task_lifecycle_over_grpc() {
    let shutdown = CancellationToken::new();
    let address = spawn_agent("grpc-agent", shutdown.clone()).await;
    let handle = plaintext_connector().connect(&address, TOKEN).await.unwrap();
    let tool = handle.tools().await.unwrap().remove(0);

    let job = Job::new(tool.id, "timer", "tester")
        .with_parameter("seconds", "100000")
        .with_parameter("result", "Success");
    let started = handle.add_task(&job).await.unwrap();
    assert_eq!(started.id, job.id);
    assert_eq!(started.status, JobStatus::Running);
    assert_eq!(started.parameters.get("seconds").map(String::as_str), Some("100000"));

    let paused = handle.task_pause(&job).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);

    let resumed = handle.task_run(&job).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Running);

    let all = handle.all_task_status().await.unwrap();
    assert_eq!(all.len(), 1);

    let quit = handle.task_quit(&job).await.unwrap();
    assert_eq!(quit.status, JobStatus::Quit);
    assert!(handle.all_task_status().await.unwrap().is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn test_queue_runs_job_on_remote_agent() {
    let shutdown = CancellationToken::new();
    let address = spawn_agent("grpc-agent", shutdown.clone()).await;
    let queue = Arc::new(Queue::new(Arc::new(plaintext_connector())));

    let resource_id = queue.add_resource(&address, "remote", TOKEN).await.unwrap();
    let tool_id = *queue.tools().await.keys().next().unwrap();

    let job = Job::new(tool_id, "timer", "tester")
        .with_parameter("seconds", "3")
        .with_parameter("result", "Success");
    let id = queue.add_job(job).await.unwrap();

    let done = wait_for(
        || async {
            queue.reconcile().await;
            queue.job_info(id).await.unwrap().status == JobStatus::Done
        },
        Duration::from_secs(5),
        TICK,
    )
    .await;
    assert!(done, "Remote timer job never finished");

    let job = queue.job_info(id).await.unwrap();
    assert_eq!(job.resource_id, Some(resource_id));
    assert_eq!(job.progress, 100.0);
    // The queue keeps its own tool id, not the agent's.
    assert_eq!(job.tool_id, tool_id);

    shutdown.cancel();
}

#[tokio::test]
async fn test_unreachable_resource_is_not_registered() {
    // Grab a free port, then close it so nothing listens there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let queue = Queue::new(Arc::new(plaintext_connector()));
    let result = queue.add_resource(&address, "ghost", TOKEN).await;
    assert!(matches!(result, Err(Error::Unavailable(_))));
    assert!(queue.get_resources().await.is_empty());
}

#[tokio::test]
async fn test_lost_agent_pauses_resource() {
    let shutdown = CancellationToken::new();
    let address = spawn_agent("grpc-agent", shutdown.clone()).await;
    let queue = Queue::new(Arc::new(plaintext_connector()));
    let resource_id = queue.add_resource(&address, "remote", TOKEN).await.unwrap();

    shutdown.cancel();
    let paused = wait_for(
        || async {
            queue.reconcile().await;
            queue.get_resource(resource_id).await.unwrap().status
                == hashfleet::scheduler::ResourceStatus::Paused
        },
        Duration::from_secs(5),
        Duration::from_millis(50),
    )
    .await;
    assert!(paused, "Unreachable resource was not paused");
}
