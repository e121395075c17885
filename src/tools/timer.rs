//! Test tool: counts one unit per second for `seconds` seconds, then ends as
//! `done` when `result` is `Success` and `failed` otherwise. Useful for
//! exercising the queue without real cracking tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{TimerConfig, ToolsConfig};
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::tasker::{TaskIo, Tasker, Tooler};
use crate::tool::Tool;

pub const KIND: &str = "timer";

const TICK: Duration = Duration::from_secs(1);

pub struct TimerTooler {
    tool: Tool,
    tick: Duration,
}

impl TimerTooler {
    pub fn new(config: &TimerConfig) -> Self {
        let parameters = json!({
            "schema": {
                "type": "object",
                "title": "Timer",
                "properties": {
                    "seconds": { "type": "integer", "minimum": 1 },
                    "result": { "type": "string", "enum": ["Success", "Failure"] }
                },
                "required": ["seconds", "result"]
            },
            "form": ["seconds", "result"]
        });
        Self {
            tool: Tool {
                id: Uuid::new_v4(),
                name: "Timer Test Plugin".to_string(),
                kind: "Test".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                requirement: config.requirement.clone(),
                parameters: parameters.to_string(),
            },
            tick: TICK,
        }
    }

    /// Shorten the tick, for tests that cannot wait whole seconds.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn factory(config: &ToolsConfig) -> Result<Option<Arc<dyn Tooler>>> {
        Ok(config
            .timer
            .as_ref()
            .map(|timer| Arc::new(TimerTooler::new(timer)) as Arc<dyn Tooler>))
    }
}

impl Tooler for TimerTooler {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    fn new_task(&self, mut job: Job) -> Result<Box<dyn Tasker>> {
        let seconds: i64 = job
            .parameter("seconds")
            .ok_or_else(|| Error::InvalidParameter("seconds is required".into()))?
            .parse()
            .map_err(|_| Error::InvalidParameter("Unable to parse seconds".into()))?;
        if seconds < 1 {
            return Err(Error::InvalidParameter("seconds must be positive".into()));
        }
        let succeed = job.parameter("result") == Some("Success");

        job.cracked_hashes = 0;
        job.total_hashes = seconds;
        job.performance_title = "Time data".to_string();

        Ok(Box::new(TimerTasker {
            ops: Mutex::new(()),
            state: Arc::new(Mutex::new(TimerState {
                job,
                succeed,
                ticker: None,
            })),
            tick: self.tick,
        }))
    }
}

struct TimerState {
    job: Job,
    succeed: bool,
    ticker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TimerState {
    fn refresh(&mut self) {
        let job = &mut self.job;
        job.progress = job.cracked_hashes as f64 / job.total_hashes as f64 * 100.0;
        job.etc = format!("{} seconds", job.total_hashes - job.cracked_hashes);
    }
}

pub struct TimerTasker {
    ops: Mutex<()>,
    state: Arc<Mutex<TimerState>>,
    tick: Duration,
}

impl TimerTasker {
    async fn stop(&self, status: JobStatus) -> Job {
        let ticker = self.state.lock().await.ticker.take();
        if let Some((cancel, handle)) = ticker {
            cancel.cancel();
            let _ = handle.await;
        }
        let mut state = self.state.lock().await;
        if !state.job.status.is_finished() {
            state.job.status = status;
        }
        state.refresh();
        state.job.clone()
    }
}

#[async_trait]
impl Tasker for TimerTasker {
    async fn status(&self) -> Job {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;
        state.refresh();
        let count = state.job.cracked_hashes as f64;
        state.job.record_performance(count);
        tracing::debug!(
            job_id = %state.job.id,
            cur = state.job.cracked_hashes,
            max = state.job.total_hashes,
            "Timer status"
        );
        state.job.clone()
    }

    async fn run(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;
        let status = state.job.status;
        if status.is_finished() {
            return Err(Error::AlreadyFinished {
                job_id: state.job.id,
                status,
            });
        }
        if status == JobStatus::Running {
            return Ok(());
        }

        state.job.status = JobStatus::Running;
        if state.job.start_time.is_none() {
            state.job.start_time = Some(Utc::now());
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(count_up(self.state.clone(), cancel.clone(), self.tick));
        state.ticker = Some((cancel, handle));
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        let status = self.state.lock().await.job.status;
        match status {
            JobStatus::Running => {}
            JobStatus::Paused => return Ok(()),
            JobStatus::Created => {
                return Err(Error::InvalidTransition {
                    job_id: self.state.lock().await.job.id,
                    status,
                    action: "pause",
                })
            }
            _ => {
                return Err(Error::AlreadyFinished {
                    job_id: self.state.lock().await.job.id,
                    status,
                })
            }
        }
        let job = self.stop(JobStatus::Paused).await;
        if job.status.is_finished() {
            return Err(Error::AlreadyFinished {
                job_id: job.id,
                status: job.status,
            });
        }
        Ok(())
    }

    async fn quit(&self) -> Job {
        let _op = self.ops.lock().await;
        self.stop(JobStatus::Quit).await
    }

    async fn ioe(&self) -> Option<TaskIo> {
        // Nothing reads or writes these, but interactive callers still get
        // well-formed handles while the timer runs.
        let state = self.state.lock().await;
        if state.job.status != JobStatus::Running {
            return None;
        }
        let (stdin, _) = mpsc::unbounded_channel();
        let (stdout, stdout_rx) = broadcast::channel(1);
        let (stderr, stderr_rx) = broadcast::channel(1);
        drop((stdout, stderr));
        Some(TaskIo {
            stdin,
            stdout: stdout_rx,
            stderr: stderr_rx,
        })
    }
}

async fn count_up(state: Arc<Mutex<TimerState>>, cancel: CancellationToken, tick: Duration) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(tick) => {}
        }

        let mut state = state.lock().await;
        state.job.cracked_hashes += 1;
        if state.job.cracked_hashes >= state.job.total_hashes {
            state.job.status = if state.succeed {
                JobStatus::Done
            } else {
                JobStatus::Failed
            };
            if !state.succeed {
                state.job.error = Some("Timer configured to fail".to_string());
            }
            state.refresh();
            state.ticker = None;
            tracing::info!(job_id = %state.job.id, status = %state.job.status, "Timer ended");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tooler() -> TimerTooler {
        TimerTooler::new(&TimerConfig::default()).with_tick(Duration::from_millis(20))
    }

    fn job(seconds: &str, result: &str) -> Job {
        Job::new(Uuid::new_v4(), "timer", "tester")
            .with_parameter("seconds", seconds)
            .with_parameter("result", result)
    }

    #[test]
    fn rejects_unparsable_seconds() {
        let err = tooler().new_task(job("soon", "Success")).err().unwrap();
        assert!(matches!(err, Error::InvalidParameter(_)));
        let err = tooler()
            .new_task(Job::new(Uuid::new_v4(), "timer", "tester"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn failure_result_ends_failed() {
        let task = tooler().new_task(job("2", "Failure")).unwrap();
        task.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = task.status().await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn pause_keeps_counter() {
        let task = tooler().new_task(job("1000", "Success")).unwrap();
        task.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        task.pause().await.unwrap();
        let paused = task.status().await;
        assert_eq!(paused.status, JobStatus::Paused);
        assert!(paused.cracked_hashes > 0);

        task.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let resumed = task.status().await;
        assert!(resumed.cracked_hashes >= paused.cracked_hashes);
        assert!(resumed.progress >= paused.progress);

        let quit = task.quit().await;
        assert_eq!(quit.status, JobStatus::Quit);
        assert!(task.run().await.unwrap_err().is_already_finished());
    }
}
