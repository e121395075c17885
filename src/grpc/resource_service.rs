use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::job::Job;
use crate::proto::resource_service_server::ResourceService;
use crate::proto::{
    AuthRequest, HardwareResponse, JobInfo, JobListResponse, PingResponse, TaskRequest,
    TaskResponse, ToolInfo, ToolsResponse,
};
use crate::worker::ResourceAgent;

/// gRPC face of a [`ResourceAgent`].
pub struct ResourceServiceImpl {
    agent: Arc<ResourceAgent>,
}

impl ResourceServiceImpl {
    pub fn new(agent: Arc<ResourceAgent>) -> Self {
        Self { agent }
    }

    /// Check the caller's token, then decode the job payload.
    fn authorized(&self, req: TaskRequest) -> Result<(String, Job), Status> {
        self.agent.authenticate(&req.auth_token)?;
        let token = req.auth_token.clone();
        Ok((token, req.into_job()?))
    }
}

#[tonic::async_trait]
impl ResourceService for ResourceServiceImpl {
    async fn ping(&self, request: Request<AuthRequest>) -> Result<Response<PingResponse>, Status> {
        let req = request.into_inner();
        let status = self.agent.ping(&req.auth_token).await?;
        Ok(Response::new(PingResponse {
            name: status.name,
            version: status.version,
            tasks: status.tasks as u32,
        }))
    }

    async fn resource_hardware(
        &self,
        request: Request<AuthRequest>,
    ) -> Result<Response<HardwareResponse>, Status> {
        let req = request.into_inner();
        let hardware = self.agent.hardware(&req.auth_token).await?;
        Ok(Response::new(HardwareResponse { hardware }))
    }

    async fn resource_tools(
        &self,
        request: Request<AuthRequest>,
    ) -> Result<Response<ToolsResponse>, Status> {
        let req = request.into_inner();
        let tools = self.agent.tools(&req.auth_token).await?;
        Ok(Response::new(ToolsResponse {
            tools: tools.iter().map(ToolInfo::from).collect(),
        }))
    }

    async fn add_task(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let (token, job) = self.authorized(request.into_inner())?;
        let job = self.agent.add_task(&token, job).await?;
        Ok(Response::new(job.into()))
    }

    async fn task_status(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let (token, job) = self.authorized(request.into_inner())?;
        let job = self.agent.task_status(&token, job.id).await?;
        Ok(Response::new(job.into()))
    }

    async fn task_run(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let (token, job) = self.authorized(request.into_inner())?;
        let job = self.agent.task_run(&token, job.id).await?;
        Ok(Response::new(job.into()))
    }

    async fn task_pause(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let (token, job) = self.authorized(request.into_inner())?;
        let job = self.agent.task_pause(&token, job.id).await?;
        Ok(Response::new(job.into()))
    }

    async fn task_quit(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let (token, job) = self.authorized(request.into_inner())?;
        let job = self.agent.task_quit(&token, job.id).await?;
        Ok(Response::new(job.into()))
    }

    async fn all_task_status(
        &self,
        request: Request<AuthRequest>,
    ) -> Result<Response<JobListResponse>, Status> {
        let req = request.into_inner();
        let jobs = self.agent.all_task_status(&req.auth_token).await?;
        Ok(Response::new(JobListResponse {
            jobs: jobs.iter().map(JobInfo::from).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimerConfig;
    use crate::tasker::Tooler;
    use crate::tools::timer::TimerTooler;
    use uuid::Uuid;

    fn service() -> (ResourceServiceImpl, Uuid) {
        let tooler = TimerTooler::new(&TimerConfig::default());
        let tool_id = tooler.tool().id;
        let agent = ResourceAgent::new(
            "gpu-01",
            "s3cret",
            &[],
            vec![Arc::new(tooler) as Arc<dyn Tooler>],
        );
        (ResourceServiceImpl::new(Arc::new(agent)), tool_id)
    }

    fn malformed(auth_token: &str, tool_id: Uuid) -> Request<TaskRequest> {
        let mut info = JobInfo::from(&Job::new(tool_id, "timer", "alice"));
        info.id = "not-a-uuid".into();
        Request::new(TaskRequest {
            auth_token: auth_token.into(),
            job: Some(info),
        })
    }

    #[tokio::test]
    async fn bad_token_wins_over_malformed_payload() {
        let (svc, tool_id) = service();
        let codes = [
            svc.add_task(malformed("nope", tool_id)).await.unwrap_err().code(),
            svc.task_status(malformed("nope", tool_id)).await.unwrap_err().code(),
            svc.task_run(malformed("nope", tool_id)).await.unwrap_err().code(),
            svc.task_pause(malformed("nope", tool_id)).await.unwrap_err().code(),
            svc.task_quit(malformed("nope", tool_id)).await.unwrap_err().code(),
        ];
        assert!(codes.iter().all(|c| *c == tonic::Code::Unauthenticated));

        let err = svc.task_status(malformed("s3cret", tool_id)).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
