use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::scheduler::handle::{ResourceConnector, ResourceHandle};
use crate::scheduler::hooks::{HookData, HookEvent, HookJob, HookResource, HookStackEntry, Hooks};
use crate::scheduler::pool::{ResourceInfo, ResourcePool, ResourceStatus};
use crate::scheduler::stack::JobStack;
use crate::tool::Tool;

pub const NO_TOOL_AVAILABLE: &str = "No tool available in current resource pool.";

struct QueueState {
    stack: JobStack,
    pool: ResourcePool,
    /// Jobs an operator paused; the scheduler leaves them alone until resumed.
    held: HashSet<Uuid>,
    /// Jobs with an assignment RPC outstanding.
    in_flight: HashSet<Uuid>,
    /// Finished jobs already reported to the finish hooks.
    announced: HashSet<Uuid>,
    paused: bool,
}

#[derive(Clone, Copy)]
enum Dispatch {
    Start,
    Resume,
}

/// One unit of assignment work, decided under the lock and carried out
/// after it is released.
struct Plan {
    dispatch: Dispatch,
    resource_id: Uuid,
    handle: Arc<dyn ResourceHandle>,
    /// The job as the resource should see it (resource-local tool id).
    job: Job,
}

/// What to do with a task once its assignment call has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Keep,
    /// The job was paused, or its queue or resource was, while the call was
    /// outstanding.
    Pause,
    /// The job was quit or removed while the call was outstanding.
    Abandon,
}

/// A remote operation on a job, with what is needed to carry it out.
struct Target {
    resource_id: Uuid,
    handle: Arc<dyn ResourceHandle>,
    job: Job,
}

/// Control plane: the ordered job stack, the resource pool, and the
/// propagation of job operations to the agents running them.
///
/// One lock guards both the stack and the pool. It is never held across
/// an RPC: every remote call is planned under the lock, made without it,
/// and its result folded back under the lock.
pub struct Queue {
    state: RwLock<QueueState>,
    connector: Arc<dyn ResourceConnector>,
    hooks: Hooks,
}

impl Queue {
    pub fn new(connector: Arc<dyn ResourceConnector>) -> Self {
        Self {
            state: RwLock::new(QueueState {
                stack: JobStack::new(),
                pool: ResourcePool::new(),
                held: HashSet::new(),
                in_flight: HashSet::new(),
                announced: HashSet::new(),
                paused: false,
            }),
            connector,
            hooks: Hooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    // ---- jobs ----

    /// Accept a job onto the end of the stack and try to place it.
    ///
    /// Fails when no registered resource offers the job's tool.
    pub async fn add_job(&self, mut job: Job) -> Result<Uuid> {
        let id = {
            let mut state = self.state.write().await;
            if !state.pool.has_tool(job.tool_id) {
                return Err(Error::ToolNotFound(job.tool_id));
            }
            if state.stack.contains(job.id) {
                return Err(Error::InvalidParameter(format!(
                    "job {} is already queued",
                    job.id
                )));
            }
            job.status = JobStatus::Created;
            job.error = None;
            job.resource_id = None;
            job.start_time = None;
            tracing::info!(job_id = %job.id, tool_id = %job.tool_id, owner = %job.owner, "Job queued");
            self.hooks.fire(HookEvent::JobCreate, hook_job(&state.pool, &job));
            let id = job.id;
            state.stack.push(job);
            id
        };
        self.assign().await;
        Ok(id)
    }

    pub async fn all_jobs(&self) -> Vec<Job> {
        self.state.read().await.stack.iter().cloned().collect()
    }

    pub async fn job_info(&self, id: Uuid) -> Result<Job> {
        self.state
            .read()
            .await
            .stack
            .get(id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }

    /// Jobs currently or last placed on `resource_id`.
    pub async fn jobs_by_resource(&self, resource_id: Uuid) -> Vec<Job> {
        self.state
            .read()
            .await
            .stack
            .iter()
            .filter(|job| job.resource_id == Some(resource_id))
            .cloned()
            .collect()
    }

    /// Re-establish stack order from a full permutation of the job ids.
    pub async fn stack_reorder<S: AsRef<str>>(&self, order: &[S]) -> Vec<Error> {
        let mut state = self.state.write().await;
        let errors = state.stack.reorder(order);
        if errors.is_empty() {
            tracing::info!(jobs = order.len(), "Stack reordered");
            let jobs = state.stack.iter().map(HookStackEntry::from).collect();
            self.hooks.fire(HookEvent::QueueReorder, HookData::Stack { jobs });
        }
        errors
    }

    /// Pause a running job and hold it until [`Queue::resume_job`].
    pub async fn pause_job(&self, id: Uuid) -> Result<()> {
        let target = {
            let mut state = self.state.write().await;
            let status = state.stack.get(id).ok_or(Error::JobNotFound(id))?.status;
            match status {
                JobStatus::Paused => {
                    state.held.insert(id);
                    return Ok(());
                }
                status if status.is_finished() => {
                    return Err(Error::AlreadyFinished { job_id: id, status })
                }
                JobStatus::Created => {
                    return Err(Error::InvalidTransition {
                        job_id: id,
                        status: JobStatus::Created,
                        action: "pause",
                    })
                }
                _ => {}
            }
            if state.in_flight.contains(&id) {
                // Applied once the outstanding assignment returns.
                state.held.insert(id);
                return Ok(());
            }
            let target = state.target(id)?;
            state.held.insert(id);
            target
        };
        self.pause_target(target).await
    }

    /// Release an operator-held job back to the scheduler.
    pub async fn resume_job(&self, id: Uuid) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let job = state.stack.get(id).ok_or(Error::JobNotFound(id))?;
            if job.status.is_finished() {
                return Err(Error::AlreadyFinished {
                    job_id: id,
                    status: job.status,
                });
            }
            state.held.remove(&id);
        }
        self.assign().await;
        Ok(())
    }

    /// Quit a job wherever it is. Quitting a finished job is a no-op.
    pub async fn quit_job(&self, id: Uuid) -> Result<()> {
        let target = {
            let mut state = self.state.write().await;
            let job = state.stack.get_mut(id).ok_or(Error::JobNotFound(id))?;
            if job.status.is_finished() {
                return Ok(());
            }
            if job.status == JobStatus::Created {
                // Never placed, or an assignment RPC is outstanding; in the
                // latter case the assigner quits the remote task when the
                // call returns.
                job.status = JobStatus::Quit;
                tracing::info!(job_id = %id, "Job quit before placement");
                self.announce_finished(&mut state);
                return Ok(());
            }
            match state.target(id) {
                Ok(target) => target,
                Err(_) => {
                    // Its resource is gone; nothing left to stop.
                    state.finish_locally(id, JobStatus::Quit, None);
                    self.announce_finished(&mut state);
                    return Ok(());
                }
            }
        };
        self.quit_target(target).await
    }

    /// Quit a job if it is still active, then drop it from the stack.
    ///
    /// The job is removed even when the remote quit fails; that failure is
    /// still returned.
    pub async fn remove_job(&self, id: Uuid) -> Result<()> {
        let quit = self.quit_job(id).await;
        if let Err(Error::JobNotFound(_)) = quit {
            return quit;
        }
        let mut state = self.state.write().await;
        state.stack.remove(id);
        state.held.remove(&id);
        state.announced.remove(&id);
        state.pool.release(id);
        tracing::info!(job_id = %id, "Job removed");
        quit
    }

    // ---- queue ----

    /// Stop assigning and pause every running job. Jobs paused this way are
    /// resumed automatically by [`Queue::resume_queue`].
    pub async fn pause_queue(&self) -> Vec<Error> {
        let targets = {
            let mut state = self.state.write().await;
            state.paused = true;
            state.running_targets(|_| true)
        };
        tracing::info!(jobs = targets.len(), "Pausing queue");
        let mut errors = Vec::new();
        for target in targets {
            if let Err(e) = self.pause_target(target).await {
                errors.push(e);
            }
        }
        errors
    }

    pub async fn resume_queue(&self) {
        self.state.write().await.paused = false;
        tracing::info!("Queue resumed");
        self.assign().await;
    }

    /// Quit every job that has not finished. Assignment stays stopped.
    pub async fn quit(&self) -> Vec<Error> {
        let ids: Vec<Uuid> = {
            let mut state = self.state.write().await;
            state.paused = true;
            state
                .stack
                .iter()
                .filter(|job| !job.status.is_finished())
                .map(|job| job.id)
                .collect()
        };
        tracing::info!(jobs = ids.len(), "Quitting all jobs");
        let mut errors = Vec::new();
        for id in ids {
            if let Err(e) = self.quit_job(id).await {
                errors.push(e);
            }
        }
        errors
    }

    // ---- resources ----

    /// Connect to an agent, read its capabilities and register it.
    ///
    /// Nothing is registered unless every handshake step succeeds.
    pub async fn add_resource(&self, address: &str, name: &str, auth_token: &str) -> Result<Uuid> {
        if self.state.read().await.pool.address_taken(address) {
            return Err(Error::DuplicateResource(address.to_string()));
        }

        let handle = self.connector.connect(address, auth_token).await?;
        let agent = handle.ping().await?;
        let hardware = handle.hardware().await?;
        let tools = handle.tools().await?;

        let tool_names = tools.iter().map(|tool| tool.name.clone()).collect();
        let id = {
            let mut state = self.state.write().await;
            if state.pool.address_taken(address) {
                return Err(Error::DuplicateResource(address.to_string()));
            }
            state.pool.register(
                name.to_string(),
                address.to_string(),
                hardware,
                tools,
                handle,
            )
        };
        tracing::info!(
            resource_id = %id,
            name,
            address,
            agent = %agent.name,
            version = %agent.version,
            "Resource added"
        );
        self.hooks.fire(
            HookEvent::ResourceConnect,
            HookData::Resource(HookResource {
                id,
                name: name.to_string(),
                address: address.to_string(),
                tools: tool_names,
            }),
        );
        self.assign().await;
        Ok(id)
    }

    /// Quit the resource's jobs and drop it from the pool. Created jobs
    /// whose tool is no longer offered anywhere are quit too.
    pub async fn remove_resource(&self, id: Uuid) -> Vec<Error> {
        let ids: Vec<Uuid> = {
            let state = self.state.read().await;
            if state.pool.get(id).is_none() {
                return vec![Error::ResourceNotFound(id)];
            }
            state
                .stack
                .iter()
                .filter(|job| job.resource_id == Some(id) && !job.status.is_finished())
                .map(|job| job.id)
                .collect()
        };

        let mut errors = Vec::new();
        for job_id in ids {
            if let Err(e) = self.quit_job(job_id).await {
                errors.push(e);
            }
        }

        let mut state = self.state.write().await;
        if let Some(resource) = state.pool.remove(id) {
            tracing::info!(resource_id = %id, name = %resource.name, "Resource removed");
        }
        state.reap_unplaceable();
        self.announce_finished(&mut state);
        errors
    }

    /// Stop placing jobs on a resource and pause what runs there.
    pub async fn pause_resource(&self, id: Uuid) -> Vec<Error> {
        let targets = {
            let mut state = self.state.write().await;
            match state.pool.get_mut(id) {
                Some(resource) => resource.status = ResourceStatus::Paused,
                None => return vec![Error::ResourceNotFound(id)],
            }
            state.running_targets(|job| job.resource_id == Some(id))
        };
        tracing::info!(resource_id = %id, jobs = targets.len(), "Pausing resource");
        let mut errors = Vec::new();
        for target in targets {
            if let Err(e) = self.pause_target(target).await {
                errors.push(e);
            }
        }
        errors
    }

    pub async fn resume_resource(&self, id: Uuid) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let resource = state.pool.get_mut(id).ok_or(Error::ResourceNotFound(id))?;
            resource.status = ResourceStatus::Active;
        }
        tracing::info!(resource_id = %id, "Resource resumed");
        self.assign().await;
        Ok(())
    }

    pub async fn get_resources(&self) -> Vec<ResourceInfo> {
        self.state.read().await.pool.infos()
    }

    pub async fn get_resource(&self, id: Uuid) -> Result<ResourceInfo> {
        let state = self.state.read().await;
        let resource = state.pool.get(id).ok_or(Error::ResourceNotFound(id))?;
        Ok(state.pool.info(resource))
    }

    pub async fn types(&self) -> Vec<String> {
        self.state.read().await.pool.types()
    }

    pub async fn tools(&self) -> HashMap<Uuid, Tool> {
        self.state.read().await.pool.tools()
    }

    // ---- scheduling ----

    /// Place every job that can be placed right now.
    ///
    /// Walks the stack front to back; a job that fits nowhere does not block
    /// the ones behind it.
    pub async fn assign(&self) {
        loop {
            let plan = self.state.write().await.next_plan();
            let Some(plan) = plan else { break };
            self.execute(plan).await;
        }
    }

    async fn execute(&self, plan: Plan) {
        let job_id = plan.job.id;
        let result = match plan.dispatch {
            Dispatch::Start => plan.handle.add_task(&plan.job).await,
            Dispatch::Resume => plan.handle.task_run(&plan.job).await,
        };

        let placement = {
            let mut state = self.state.write().await;
            state.in_flight.remove(&job_id);
            let placement = match result {
                Ok(snapshot) => {
                    let placement = state.placed(plan.resource_id, snapshot);
                    let started = matches!(plan.dispatch, Dispatch::Start)
                        && placement != Placement::Abandon;
                    if let Some(job) = state.stack.get(job_id).filter(|_| started) {
                        self.hooks.fire(HookEvent::JobStart, hook_job(&state.pool, job));
                    }
                    placement
                }
                Err(e) if e.is_unavailable() => {
                    state.pool.release(job_id);
                    if let Some(resource) = state.pool.get_mut(plan.resource_id) {
                        resource.status = ResourceStatus::Paused;
                    }
                    tracing::warn!(
                        job_id = %job_id,
                        resource_id = %plan.resource_id,
                        error = %e,
                        "Resource unreachable, pausing it and retrying elsewhere"
                    );
                    Placement::Keep
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, resource_id = %plan.resource_id, error = %e, "Job failed to start");
                    state.finish_locally(job_id, JobStatus::Failed, Some(e.to_string()));
                    if let Some(job) = state.stack.get_mut(job_id) {
                        job.resource_id = Some(plan.resource_id);
                    }
                    Placement::Keep
                }
            };
            self.announce_finished(&mut state);
            placement
        };

        match placement {
            Placement::Keep => {}
            Placement::Pause => {
                let target = Target {
                    resource_id: plan.resource_id,
                    handle: plan.handle,
                    job: plan.job,
                };
                if let Err(e) = self.pause_target(target).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to pause task after placement");
                }
            }
            Placement::Abandon => {
                if let Err(e) = plan.handle.task_quit(&plan.job).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to quit abandoned task");
                }
            }
        }
    }

    /// Poll every active resource, fold the snapshots into the stack,
    /// purge finished or unknown tasks from the agents, then assign.
    pub async fn reconcile(&self) {
        let resources: Vec<(Uuid, Arc<dyn ResourceHandle>)> = self
            .state
            .read()
            .await
            .pool
            .iter()
            .filter(|r| r.status == ResourceStatus::Active)
            .map(|r| (r.id, r.handle.clone()))
            .collect();

        for (resource_id, handle) in resources {
            let snapshots = match handle.all_task_status().await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    if e.is_unavailable() {
                        if let Some(resource) =
                            self.state.write().await.pool.get_mut(resource_id)
                        {
                            resource.status = ResourceStatus::Paused;
                        }
                    }
                    tracing::warn!(resource_id = %resource_id, error = %e, "Status poll failed");
                    continue;
                }
            };

            let purge = self
                .state
                .write()
                .await
                .fold_snapshots(resource_id, snapshots);
            for job in purge {
                if let Err(e) = handle.task_quit(&job).await {
                    tracing::debug!(job_id = %job.id, error = %e, "Purge failed");
                }
            }
        }

        {
            let mut state = self.state.write().await;
            state.reap_unplaceable();
            self.announce_finished(&mut state);
        }
        self.assign().await;
    }

    /// Reconcile every `interval` until `cancel` fires.
    pub async fn run_keeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Keeper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.reconcile().await,
            }
        }
        tracing::info!("Keeper stopped");
    }

    // ---- remote job operations ----

    async fn pause_target(&self, target: Target) -> Result<()> {
        let job_id = target.job.id;
        match target.handle.task_pause(&target.job).await {
            Ok(snapshot) => {
                let mut state = self.state.write().await;
                state.pool.release(job_id);
                if let Some(job) = state.stack.get_mut(job_id) {
                    job.merge_snapshot(&snapshot);
                }
                tracing::info!(job_id = %job_id, resource_id = %target.resource_id, "Job paused");
                Ok(())
            }
            Err(e) => {
                // The agent quits tasks it cannot pause; record the best
                // terminal status we can learn.
                let best = target.handle.task_status(&target.job).await.ok();
                let mut state = self.state.write().await;
                state.held.remove(&job_id);
                match best.filter(|snapshot| snapshot.status.is_finished()) {
                    Some(snapshot) => {
                        if let Some(job) = state.stack.get_mut(job_id) {
                            job.merge_snapshot(&snapshot);
                        }
                        state.pool.release(job_id);
                    }
                    None => state.finish_locally(job_id, JobStatus::Quit, Some(e.to_string())),
                }
                self.announce_finished(&mut state);
                tracing::warn!(job_id = %job_id, error = %e, "Pause failed");
                Err(e)
            }
        }
    }

    async fn quit_target(&self, target: Target) -> Result<()> {
        let job_id = target.job.id;
        let result = target.handle.task_quit(&target.job).await;
        let mut state = self.state.write().await;
        state.held.remove(&job_id);
        let outcome = match result {
            Ok(snapshot) => {
                if let Some(job) = state.stack.get_mut(job_id) {
                    job.merge_snapshot(&snapshot);
                }
                state.finish_locally(job_id, JobStatus::Quit, None);
                tracing::info!(job_id = %job_id, resource_id = %target.resource_id, "Job quit");
                Ok(())
            }
            Err(Error::JobNotFound(_)) => {
                state.finish_locally(job_id, JobStatus::Quit, None);
                Ok(())
            }
            Err(e) => {
                state.finish_locally(job_id, JobStatus::Quit, Some(e.to_string()));
                tracing::warn!(job_id = %job_id, error = %e, "Quit failed, job marked quit");
                Err(e)
            }
        };
        self.announce_finished(&mut state);
        outcome
    }

    /// Report jobs that reached a terminal status since the last call.
    fn announce_finished(&self, state: &mut QueueState) {
        if !self.hooks.wants(HookEvent::JobFinish) {
            return;
        }
        for data in state.newly_finished() {
            self.hooks.fire(HookEvent::JobFinish, data);
        }
    }
}

fn hook_job(pool: &ResourcePool, job: &Job) -> HookData {
    let tool = pool.tool(job.tool_id).map(|tool| tool.name.as_str());
    HookData::Job(HookJob::new(job, tool))
}

impl QueueState {
    /// The resource handle for a placed job.
    fn target(&self, job_id: Uuid) -> Result<Target> {
        let job = self.stack.get(job_id).ok_or(Error::JobNotFound(job_id))?;
        let resource_id = job
            .resource_id
            .ok_or_else(|| Error::Internal(format!("job {} has no resource", job_id)))?;
        let resource = self
            .pool
            .get(resource_id)
            .ok_or(Error::ResourceNotFound(resource_id))?;
        let mut job = job.clone();
        if let Some(local) = resource.tools.get(&job.tool_id) {
            job.tool_id = local.id;
        }
        Ok(Target {
            resource_id,
            handle: resource.handle.clone(),
            job,
        })
    }

    fn running_targets(&self, filter: impl Fn(&Job) -> bool) -> Vec<Target> {
        self.stack
            .iter()
            .filter(|&job| {
                job.status == JobStatus::Running && !self.in_flight.contains(&job.id) && filter(job)
            })
            .filter_map(|job| self.target(job.id).ok())
            .collect()
    }

    /// Force a job into a terminal status without a remote snapshot and
    /// free its slot. Already finished jobs keep their status.
    fn finish_locally(&mut self, job_id: Uuid, status: JobStatus, error: Option<String>) {
        if let Some(job) = self.stack.get_mut(job_id) {
            if !job.status.is_finished() {
                job.status = status;
                if error.is_some() {
                    job.error = error;
                }
            }
        }
        self.held.remove(&job_id);
        self.pool.release(job_id);
    }

    /// Pick the next job to place and reserve its slot.
    fn next_plan(&mut self) -> Option<Plan> {
        if self.paused {
            return None;
        }
        let mut chosen = None;
        for job in self.stack.iter() {
            if self.in_flight.contains(&job.id) || self.held.contains(&job.id) {
                continue;
            }
            match job.status {
                JobStatus::Created => {
                    if let Some((resource_id, local)) = self.pool.find_slot(job.tool_id) {
                        chosen = Some((Dispatch::Start, resource_id, job.id, local.clone()));
                        break;
                    }
                }
                JobStatus::Paused => {
                    // Session artifacts live on the resource that ran it.
                    let Some(resource) = job.resource_id.and_then(|id| self.pool.get(id)) else {
                        continue;
                    };
                    let Some(local) = resource.tools.get(&job.tool_id) else {
                        continue;
                    };
                    if resource.status == ResourceStatus::Active
                        && resource.slot_free(&local.requirement)
                    {
                        chosen = Some((Dispatch::Resume, resource.id, job.id, local.clone()));
                        break;
                    }
                }
                _ => {}
            }
        }

        let (dispatch, resource_id, job_id, local) = chosen?;
        let handle = self.pool.get(resource_id)?.handle.clone();
        self.pool.occupy(resource_id, &local.requirement, job_id);
        self.in_flight.insert(job_id);

        let mut job = self.stack.get(job_id)?.clone();
        job.tool_id = local.id;
        job.resource_id = Some(resource_id);
        tracing::debug!(job_id = %job_id, resource_id = %resource_id, "Job planned");
        Some(Plan {
            dispatch,
            resource_id,
            handle,
            job,
        })
    }

    /// Fold the agent's answer to an assignment.
    ///
    /// Pauses issued while the call was outstanding skipped this job, so
    /// they are re-checked here against the now running task.
    fn placed(&mut self, resource_id: Uuid, snapshot: Job) -> Placement {
        let job_id = snapshot.id;
        let Some(job) = self.stack.get_mut(job_id) else {
            self.pool.release(job_id);
            return Placement::Abandon;
        };
        if job.status.is_finished() {
            self.pool.release(job_id);
            return Placement::Abandon;
        }
        job.merge_snapshot(&snapshot);
        job.resource_id = Some(resource_id);
        tracing::info!(job_id = %job_id, resource_id = %resource_id, status = %job.status, "Job placed");
        if job.status.is_finished() {
            self.pool.release(job_id);
            return Placement::Keep;
        }

        let resource_paused = !matches!(
            self.pool.get(resource_id).map(|resource| resource.status),
            Some(ResourceStatus::Active)
        );
        if self.paused || resource_paused || self.held.contains(&job_id) {
            tracing::info!(job_id = %job_id, "Pause requested during placement");
            return Placement::Pause;
        }
        Placement::Keep
    }

    /// Merge one resource's snapshots. Returns the tasks to purge from the
    /// agent: finished jobs and jobs the queue does not place there.
    fn fold_snapshots(&mut self, resource_id: Uuid, snapshots: Vec<Job>) -> Vec<Job> {
        let mut purge = Vec::new();
        for snapshot in snapshots {
            if self.in_flight.contains(&snapshot.id) {
                continue;
            }
            let finished = match self.stack.get_mut(snapshot.id) {
                Some(job) if job.resource_id == Some(resource_id) => {
                    if !job.merge_snapshot(&snapshot) {
                        tracing::debug!(
                            job_id = %job.id,
                            local = %job.status,
                            remote = %snapshot.status,
                            "Ignoring stale snapshot"
                        );
                    }
                    job.status.is_finished()
                }
                _ => {
                    tracing::warn!(job_id = %snapshot.id, resource_id = %resource_id, "Purging unknown task");
                    purge.push(snapshot);
                    continue;
                }
            };
            if finished {
                self.pool.release(snapshot.id);
                self.held.remove(&snapshot.id);
                purge.push(snapshot);
            }
        }
        purge
    }

    /// Finished jobs not reported yet, marked as reported.
    fn newly_finished(&mut self) -> Vec<HookData> {
        let mut events = Vec::new();
        for job in self.stack.iter() {
            if job.status.is_finished() && self.announced.insert(job.id) {
                events.push(hook_job(&self.pool, job));
            }
        }
        events
    }

    /// Quit created jobs whose tool no resource offers any more.
    fn reap_unplaceable(&mut self) {
        let pool = &self.pool;
        for job in self.stack.iter_mut() {
            if job.status == JobStatus::Created && !pool.has_tool(job.tool_id) {
                job.status = JobStatus::Quit;
                job.error = Some(NO_TOOL_AVAILABLE.to_string());
                tracing::warn!(job_id = %job.id, tool_id = %job.tool_id, "No resource offers this job's tool");
            }
        }
    }
}
