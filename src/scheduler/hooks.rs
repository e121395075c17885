use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::HooksConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};

/// Queue events that can notify external targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    JobCreate,
    JobStart,
    JobFinish,
    ResourceConnect,
    QueueReorder,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::JobCreate => "job_create",
            HookEvent::JobStart => "job_start",
            HookEvent::JobFinish => "job_finish",
            HookEvent::ResourceConnect => "resource_connect",
            HookEvent::QueueReorder => "queue_reorder",
        }
    }
}

/// A job as hook targets see it.
#[derive(Debug, Clone, Serialize)]
pub struct HookJob {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub owner: String,
    pub tool_id: Uuid,
    pub tool_name: Option<String>,
    pub resource_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub cracked_hashes: i64,
    pub total_hashes: i64,
    pub progress: f64,
    pub etc: String,
    pub parameters: HashMap<String, String>,
    pub performance_title: String,
    pub performance: BTreeMap<String, String>,
    pub output_titles: Vec<String>,
    pub output: Vec<Vec<String>>,
}

impl HookJob {
    pub fn new(job: &Job, tool_name: Option<&str>) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status,
            owner: job.owner.clone(),
            tool_id: job.tool_id,
            tool_name: tool_name.map(str::to_string),
            resource_id: job.resource_id,
            start_time: job.start_time,
            error: job.error.clone(),
            cracked_hashes: job.cracked_hashes,
            total_hashes: job.total_hashes,
            progress: job.progress,
            etc: job.etc.clone(),
            parameters: job.parameters.clone(),
            performance_title: job.performance_title.clone(),
            performance: job.performance.clone(),
            output_titles: job.output_titles.clone(),
            output: job.output.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HookResource {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub tools: Vec<String>,
}

/// Stack position of one job in a reorder notification.
#[derive(Debug, Clone, Serialize)]
pub struct HookStackEntry {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub owner: String,
    pub progress: f64,
}

impl From<&Job> for HookStackEntry {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status,
            owner: job.owner.clone(),
            progress: job.progress,
        }
    }
}

/// What a hook target receives.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HookData {
    Job(HookJob),
    Resource(HookResource),
    Stack { jobs: Vec<HookStackEntry> },
}

#[derive(Debug, Clone, Serialize)]
pub struct HookPayload {
    pub event: HookEvent,
    pub time: DateTime<Utc>,
    pub data: HookData,
}

/// Delivers queue events to the configured targets.
///
/// Delivery runs on spawned tasks: the queue never waits for a target, and
/// a failing target is logged and otherwise ignored.
#[derive(Clone)]
pub struct Hooks {
    config: Arc<HooksConfig>,
    http: reqwest::Client,
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new(HooksConfig::default())
    }
}

impl Hooks {
    pub fn new(config: HooksConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }

    fn targets(&self, event: HookEvent) -> &[String] {
        match event {
            HookEvent::JobCreate => &self.config.job_create,
            HookEvent::JobStart => &self.config.job_start,
            HookEvent::JobFinish => &self.config.job_finish,
            HookEvent::ResourceConnect => &self.config.resource_connect,
            HookEvent::QueueReorder => &self.config.queue_reorder,
        }
    }

    /// Whether any target listens for `event`.
    pub fn wants(&self, event: HookEvent) -> bool {
        !self.targets(event).is_empty()
    }

    /// Send `data` to every target of `event` in the background.
    pub fn fire(&self, event: HookEvent, data: HookData) {
        if !self.wants(event) {
            return;
        }
        let payload = HookPayload {
            event,
            time: Utc::now(),
            data,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(event = event.as_str(), error = %e, "Failed to encode hook payload");
                return;
            }
        };
        tracing::debug!(event = event.as_str(), "Running hooks");
        for target in self.targets(event) {
            let hooks = self.clone();
            let target = target.clone();
            let body = body.clone();
            tokio::spawn(async move {
                if let Err(e) = hooks.deliver(event, &target, body).await {
                    tracing::warn!(event = event.as_str(), error = %e, "Hook failed");
                }
            });
        }
    }

    async fn deliver(&self, event: HookEvent, target: &str, body: Vec<u8>) -> Result<()> {
        let timeout = self.config.timeout();
        if target.starts_with("http://") || target.starts_with("https://") {
            self.post(target, body, timeout).await
        } else {
            run_program(event, target, body, timeout).await
        }
    }

    async fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<()> {
        let failed = |reason: String| Error::Hook {
            target: url.to_string(),
            reason,
        };
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        tracing::debug!(url, status = status.as_u16(), "Webhook answered");
        if !status.is_success() {
            return Err(failed(format!("status {}", status)));
        }
        Ok(())
    }
}

/// Run `program` with the payload on stdin. It is killed once `timeout`
/// passes.
async fn run_program(
    event: HookEvent,
    program: &str,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<()> {
    let mut child = Command::new(program)
        .env("HASHFLEET_EVENT", event.as_str())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A program that ignores its input may close stdin early.
        if let Err(e) = stdin.write_all(&body).await {
            tracing::debug!(program, error = %e, "Hook program did not read its input");
        }
    }

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            tracing::warn!(
                program,
                timeout_secs = timeout.as_secs(),
                "Hook program took too long, killing it"
            );
            child.kill().await?;
            return Err(Error::Hook {
                target: program.to_string(),
                reason: "timed out".into(),
            });
        }
    };
    if !status.success() {
        return Err(Error::Hook {
            target: program.to_string(),
            reason: status.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn job_payload_shape() {
        let job = Job::new(Uuid::new_v4(), "crack", "alice").with_parameter("hashes", "abc");
        let payload = HookPayload {
            event: HookEvent::JobCreate,
            time: Utc::now(),
            data: HookData::Job(HookJob::new(&job, Some("Hashcat"))),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event"], "job_create");
        assert_eq!(value["data"]["status"], "created");
        assert_eq!(value["data"]["tool_name"], "Hashcat");
        assert_eq!(value["data"]["parameters"]["hashes"], "abc");
    }

    #[test]
    fn only_configured_events_are_wanted() {
        let hooks = Hooks::new(HooksConfig {
            job_finish: vec!["/bin/true".into()],
            ..HooksConfig::default()
        });
        assert!(hooks.wants(HookEvent::JobFinish));
        assert!(!hooks.wants(HookEvent::JobCreate));
        assert!(!Hooks::default().wants(HookEvent::QueueReorder));
    }

    #[tokio::test]
    async fn program_runs_with_payload_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("event.json");
        let script = dir.path().join("hook.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$HASHFLEET_EVENT\" > {0}.event\ncat > {0}\n",
                out.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let body = br#"{"ok":true}"#.to_vec();
        run_program(
            HookEvent::JobStart,
            script.to_str().unwrap(),
            body,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), r#"{"ok":true}"#);
        let event = std::fs::read_to_string(format!("{}.event", out.display())).unwrap();
        assert_eq!(event.trim(), "job_start");
    }

    #[tokio::test]
    async fn slow_program_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 10\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let err = run_program(
            HookEvent::JobFinish,
            script.to_str().unwrap(),
            Vec::new(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Hook { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_program(
            HookEvent::JobCreate,
            "/nonexistent/hook",
            Vec::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
