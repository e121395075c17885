//! Wire types for the queue to resource RPC service.
//!
//! Messages are plain prost structs; the `ResourceService` client and server
//! stubs are generated by `build.rs` and included at the bottom.

use std::collections::{BTreeMap, HashMap};

use chrono::DateTime;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::tool::Tool;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthRequest {
    #[prost(string, tag = "1")]
    pub auth_token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(uint32, tag = "3")]
    pub tasks: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HardwareResponse {
    #[prost(btree_map = "string, bool", tag = "1")]
    pub hardware: BTreeMap<String, bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToolInfo {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub kind: String,
    #[prost(string, tag = "4")]
    pub version: String,
    #[prost(string, tag = "5")]
    pub requirement: String,
    #[prost(string, tag = "6")]
    pub parameters: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToolsResponse {
    #[prost(message, repeated, tag = "1")]
    pub tools: Vec<ToolInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutputRow {
    #[prost(string, repeated, tag = "1")]
    pub cells: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobInfo {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub tool_id: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub owner: String,
    #[prost(string, tag = "5")]
    pub status: String,
    #[prost(string, optional, tag = "6")]
    pub error: Option<String>,
    /// Unix milliseconds.
    #[prost(int64, optional, tag = "7")]
    pub start_time: Option<i64>,
    #[prost(string, optional, tag = "8")]
    pub resource_id: Option<String>,
    #[prost(int64, tag = "9")]
    pub cracked_hashes: i64,
    #[prost(int64, tag = "10")]
    pub total_hashes: i64,
    #[prost(double, tag = "11")]
    pub progress: f64,
    #[prost(string, tag = "12")]
    pub etc: String,
    #[prost(btree_map = "string, string", tag = "13")]
    pub performance: BTreeMap<String, String>,
    #[prost(string, tag = "14")]
    pub performance_title: String,
    #[prost(map = "string, string", tag = "15")]
    pub parameters: HashMap<String, String>,
    #[prost(string, repeated, tag = "16")]
    pub output_titles: Vec<String>,
    #[prost(message, repeated, tag = "17")]
    pub output: Vec<OutputRow>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskRequest {
    #[prost(string, tag = "1")]
    pub auth_token: String,
    #[prost(message, optional, tag = "2")]
    pub job: Option<JobInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskResponse {
    #[prost(message, optional, tag = "1")]
    pub job: Option<JobInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobListResponse {
    #[prost(message, repeated, tag = "1")]
    pub jobs: Vec<JobInfo>,
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::InvalidParameter(format!("{} '{}': {}", field, value, e)))
}

impl From<&Job> for JobInfo {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            tool_id: job.tool_id.to_string(),
            name: job.name.clone(),
            owner: job.owner.clone(),
            status: job.status.as_str().to_string(),
            error: job.error.clone(),
            start_time: job.start_time.map(|t| t.timestamp_millis()),
            resource_id: job.resource_id.map(|id| id.to_string()),
            cracked_hashes: job.cracked_hashes,
            total_hashes: job.total_hashes,
            progress: job.progress,
            etc: job.etc.clone(),
            performance: job.performance.clone(),
            performance_title: job.performance_title.clone(),
            parameters: job.parameters.clone(),
            output_titles: job.output_titles.clone(),
            output: job
                .output
                .iter()
                .map(|cells| OutputRow {
                    cells: cells.clone(),
                })
                .collect(),
        }
    }
}

impl TryFrom<JobInfo> for Job {
    type Error = Error;

    fn try_from(info: JobInfo) -> Result<Self> {
        let status: JobStatus = info.status.parse().map_err(Error::InvalidParameter)?;
        let resource_id = info
            .resource_id
            .as_deref()
            .map(|id| parse_uuid("resource id", id))
            .transpose()?;
        Ok(Job {
            id: parse_uuid("job id", &info.id)?,
            tool_id: parse_uuid("tool id", &info.tool_id)?,
            name: info.name,
            owner: info.owner,
            status,
            error: info.error,
            start_time: info.start_time.and_then(DateTime::from_timestamp_millis),
            resource_id,
            cracked_hashes: info.cracked_hashes,
            total_hashes: info.total_hashes,
            progress: info.progress,
            etc: info.etc,
            performance: info.performance,
            performance_title: info.performance_title,
            parameters: info.parameters,
            output_titles: info.output_titles,
            output: info.output.into_iter().map(|row| row.cells).collect(),
        })
    }
}

impl From<&Tool> for ToolInfo {
    fn from(tool: &Tool) -> Self {
        Self {
            id: tool.id.to_string(),
            name: tool.name.clone(),
            kind: tool.kind.clone(),
            version: tool.version.clone(),
            requirement: tool.requirement.clone(),
            parameters: tool.parameters.clone(),
        }
    }
}

impl TryFrom<ToolInfo> for Tool {
    type Error = Error;

    fn try_from(info: ToolInfo) -> Result<Self> {
        Ok(Tool {
            id: parse_uuid("tool id", &info.id)?,
            name: info.name,
            kind: info.kind,
            version: info.version,
            requirement: info.requirement,
            parameters: info.parameters,
        })
    }
}

impl TaskRequest {
    pub fn new(auth_token: &str, job: &Job) -> Self {
        Self {
            auth_token: auth_token.to_string(),
            job: Some(job.into()),
        }
    }

    /// The job payload, required on every task call.
    pub fn into_job(self) -> Result<Job> {
        self.job
            .ok_or_else(|| Error::InvalidParameter("task request carries no job".into()))?
            .try_into()
    }
}

impl From<Job> for TaskResponse {
    fn from(job: Job) -> Self {
        Self {
            job: Some((&job).into()),
        }
    }
}

impl TaskResponse {
    pub fn into_job(self) -> Result<Job> {
        self.job
            .ok_or_else(|| Error::Remote("task response carries no job".into()))?
            .try_into()
    }
}

include!(concat!(env!("OUT_DIR"), "/hashfleet.ResourceService.rs"));

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn job_survives_the_wire() {
        let mut job = Job::new(Uuid::new_v4(), "crack", "alice").with_parameter("hashes", "abc");
        job.status = JobStatus::Running;
        job.resource_id = Some(Uuid::new_v4());
        job.start_time = DateTime::from_timestamp_millis(Utc::now().timestamp_millis());
        job.output = vec![vec!["abc".into(), "pass".into()]];
        job.record_performance(12.5);

        let back = Job::try_from(JobInfo::from(&job)).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        let mut info = JobInfo::from(&Job::new(Uuid::new_v4(), "crack", "alice"));
        info.id = "not-a-uuid".into();
        assert!(matches!(Job::try_from(info), Err(Error::InvalidParameter(_))));

        let info = JobInfo {
            status: "sleeping".into(),
            ..JobInfo::from(&Job::new(Uuid::new_v4(), "crack", "alice"))
        };
        assert!(matches!(Job::try_from(info), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn task_request_requires_job() {
        let req = TaskRequest {
            auth_token: "t".into(),
            job: None,
        };
        assert!(req.into_job().is_err());
    }
}
