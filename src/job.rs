use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a job. `Done`, `Failed` and `Quit` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    Paused,
    Done,
    Failed,
    Quit,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Quit)
    }

    /// Whether moving from `self` to `next` follows the job state machine.
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self == next {
            return true;
        }
        match self {
            Created => matches!(next, Running | Done | Failed | Quit),
            Running => matches!(next, Paused | Done | Failed | Quit),
            Paused => matches!(next, Running | Done | Failed | Quit),
            Done | Failed | Quit => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Quit => "quit",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "quit" => Ok(JobStatus::Quit),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// One submitted tool invocation and everything known about its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub name: String,
    pub owner: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub resource_id: Option<Uuid>,
    pub cracked_hashes: i64,
    pub total_hashes: i64,
    pub progress: f64,
    pub etc: String,
    /// Unix seconds -> magnitude, in the unit named by `performance_title`.
    pub performance: BTreeMap<String, String>,
    pub performance_title: String,
    pub parameters: HashMap<String, String>,
    pub output_titles: Vec<String>,
    pub output: Vec<Vec<String>>,
}

impl Job {
    pub fn new(tool_id: Uuid, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), tool_id, name, owner)
    }

    pub fn with_id(
        id: Uuid,
        tool_id: Uuid,
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id,
            tool_id,
            name: name.into(),
            owner: owner.into(),
            status: JobStatus::Created,
            error: None,
            start_time: None,
            resource_id: None,
            cracked_hashes: 0,
            total_hashes: 0,
            progress: 0.0,
            etc: String::new(),
            performance: BTreeMap::new(),
            performance_title: String::new(),
            parameters: HashMap::new(),
            output_titles: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Record a throughput sample at the current time.
    pub fn record_performance(&mut self, magnitude: f64) {
        self.performance
            .insert(Utc::now().timestamp().to_string(), format!("{}", magnitude));
    }

    /// Fold a snapshot reported by a resource into the queue's record.
    ///
    /// Identity, ownership and assignment stay with the queue. Returns
    /// `false` and leaves the record untouched when the reported status
    /// would walk the state machine backwards (for example a stale running
    /// report for a job the queue already quit).
    pub fn merge_snapshot(&mut self, snapshot: &Job) -> bool {
        if !self.status.can_transition_to(snapshot.status) {
            return false;
        }
        self.status = snapshot.status;
        self.error = snapshot.error.clone();
        if snapshot.start_time.is_some() {
            self.start_time = snapshot.start_time;
        }
        self.cracked_hashes = snapshot.cracked_hashes;
        self.total_hashes = snapshot.total_hashes;
        self.progress = snapshot.progress;
        self.etc = snapshot.etc.clone();
        self.performance = snapshot.performance.clone();
        self.performance_title = snapshot.performance_title.clone();
        self.output_titles = snapshot.output_titles.clone();
        self.output = snapshot.output.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [JobStatus::Done, JobStatus::Failed, JobStatus::Quit] {
            assert!(terminal.is_finished());
            for next in [
                JobStatus::Created,
                JobStatus::Running,
                JobStatus::Paused,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn created_cannot_pause() {
        assert!(!JobStatus::Created.can_transition_to(JobStatus::Paused));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            JobStatus::Created,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Quit,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn merge_keeps_identity_and_rejects_regression() {
        let resource = Uuid::new_v4();
        let mut job = Job::new(Uuid::new_v4(), "crack", "alice").with_parameter("seconds", "5");
        job.resource_id = Some(resource);
        job.status = JobStatus::Running;

        let mut report = job.clone();
        report.owner = "mallory".into();
        report.resource_id = None;
        report.progress = 40.0;
        report.cracked_hashes = 2;
        assert!(job.merge_snapshot(&report));
        assert_eq!(job.owner, "alice");
        assert_eq!(job.resource_id, Some(resource));
        assert_eq!(job.progress, 40.0);

        job.status = JobStatus::Quit;
        report.status = JobStatus::Running;
        report.progress = 60.0;
        assert!(!job.merge_snapshot(&report));
        assert_eq!(job.status, JobStatus::Quit);
        assert_eq!(job.progress, 40.0);
    }

    #[test]
    fn empty_parameters_read_as_missing() {
        let job = Job::new(Uuid::new_v4(), "scan", "bob")
            .with_parameter("targets", "")
            .with_parameter("scantype", "connect");
        assert_eq!(job.parameter("targets"), None);
        assert_eq!(job.parameter("scantype"), Some("connect"));
    }
}
