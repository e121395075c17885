//! Test harness for queue integration tests.
//!
//! Builds in-process fleets: timer-only agents behind a `LocalConnector`,
//! registered with a fresh `Queue`.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use hashfleet::config::TimerConfig;
use hashfleet::job::{Job, JobStatus};
use hashfleet::scheduler::Queue;
use hashfleet::tasker::Tooler;
use hashfleet::tools::timer::TimerTooler;
use hashfleet::worker::{LocalConnector, ResourceAgent};

/// Timer tick used by every test agent; a "second" of timer work.
pub const TICK: Duration = Duration::from_millis(20);

pub const TOKEN: &str = "test-token";

/// Agent offering only the timer tool, with one `cpu` slot.
pub fn timer_agent(name: &str) -> Arc<ResourceAgent> {
    let tooler: Arc<dyn Tooler> =
        Arc::new(TimerTooler::new(&TimerConfig::default()).with_tick(TICK));
    Arc::new(ResourceAgent::new(
        name,
        TOKEN,
        &["cpu".to_string()],
        vec![tooler],
    ))
}

/// A queue with `n` registered timer agents.
pub struct TestFleet {
    pub queue: Arc<Queue>,
    pub agents: Vec<Arc<ResourceAgent>>,
    pub resource_ids: Vec<Uuid>,
}

impl TestFleet {
    pub async fn new(n: usize) -> Self {
        let agents: Vec<Arc<ResourceAgent>> =
            (0..n).map(|i| timer_agent(&format!("agent-{}", i))).collect();
        let connector = agents
            .iter()
            .enumerate()
            .fold(LocalConnector::new(), |connector, (i, agent)| {
                connector.with_agent(address(i), agent.clone())
            });
        let queue = Arc::new(Queue::new(Arc::new(connector)));

        let mut resource_ids = Vec::with_capacity(n);
        for i in 0..n {
            let id = queue
                .add_resource(&address(i), &format!("resource-{}", i), TOKEN)
                .await
                .expect("Failed to register test agent");
            resource_ids.push(id);
        }

        Self {
            queue,
            agents,
            resource_ids,
        }
    }

    /// Queue-level id of the timer tool.
    pub async fn timer_tool(&self) -> Uuid {
        *self
            .queue
            .tools()
            .await
            .keys()
            .next()
            .expect("No tool registered")
    }

    /// Submit a timer job that counts `ticks` ticks.
    pub async fn submit(&self, ticks: u32, result: &str) -> Uuid {
        let job = Job::new(self.timer_tool().await, "timer", "tester")
            .with_parameter("seconds", ticks.to_string())
            .with_parameter("result", result);
        self.queue.add_job(job).await.expect("Failed to submit job")
    }

    pub async fn status(&self, id: Uuid) -> JobStatus {
        self.queue.job_info(id).await.expect("Job missing").status
    }

    /// Reconcile until the job reaches `status`.
    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus, timeout: Duration) -> bool {
        wait_for(
            || async {
                self.queue.reconcile().await;
                self.status(id).await == status
            },
            timeout,
            TICK,
        )
        .await
    }
}

pub fn address(i: usize) -> String {
    format!("127.0.0.1:{}", 29000 + i)
}

/// Poll `condition` until it holds or `timeout_duration` passes.
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout_duration;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
