use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::tasker::{TaskIo, Tasker};

/// How long to wait for the copy pumps to hit EOF after the tool exits.
/// Bounded because a tool's own children may keep the pipes open.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

const BROADCAST_CAPACITY: usize = 256;

/// Tool-specific half of a [`ProcessTasker`].
pub trait ToolProcess: Send + 'static {
    fn program(&self) -> &Path;

    fn working_dir(&self) -> &Path;

    /// Arguments for a fresh session.
    fn start_args(&self) -> Vec<String>;

    /// Arguments continuing the tool's own saved session, or `None` when its
    /// restore artifact is missing and the job has to start over.
    fn resume_args(&self) -> Option<Vec<String>>;

    /// Fold output captured since the previous call into the job. Output may
    /// be cut mid-line; unparsable text is skipped.
    fn parse_output(&mut self, job: &mut Job, stdout: &str, stderr: &str);

    /// Status for a process that exited without being asked to stop.
    fn exit_status(&self, status: ExitStatus) -> JobStatus {
        if status.success() {
            JobStatus::Done
        } else {
            JobStatus::Failed
        }
    }

    /// Read result files into the job. Called each time the process exits.
    fn collect_results(&mut self, _job: &mut Job) {}
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

struct Chunk {
    stream: Stream,
    text: String,
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Interrupt,
    Kill,
}

/// Handles on the process of the current run.
struct RunControl {
    signals: mpsc::Sender<StopSignal>,
    exited: oneshot::Receiver<()>,
    stdin: mpsc::UnboundedSender<Vec<u8>>,
}

struct State<P> {
    job: Job,
    process: P,
    run: Option<RunControl>,
    chunks_tx: mpsc::UnboundedSender<Chunk>,
    chunks_rx: mpsc::UnboundedReceiver<Chunk>,
    stdout_tx: broadcast::Sender<String>,
    stderr_tx: broadcast::Sender<String>,
}

impl<P: ToolProcess> State<P> {
    /// Hand everything the pumps captured so far to the parser. The receiver
    /// lives here alone, so no chunk is seen twice or dropped between calls.
    fn drain_output(&mut self) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Ok(chunk) = self.chunks_rx.try_recv() {
            match chunk.stream {
                Stream::Stdout => stdout.push_str(&chunk.text),
                Stream::Stderr => stderr.push_str(&chunk.text),
            }
        }
        if !stdout.is_empty() || !stderr.is_empty() {
            self.process.parse_output(&mut self.job, &stdout, &stderr);
        }
        // Late output of a completed run must not pull it back below 100%.
        if self.job.status == JobStatus::Done {
            self.job.progress = 100.0;
            self.job.etc.clear();
        }
    }
}

/// Supervises an external tool process for one job.
///
/// Public operations are serialized by `ops`. The `state` lock is shared with
/// the background supervisor task and is never held while waiting for the
/// process to exit.
pub struct ProcessTasker<P> {
    job_id: Uuid,
    ops: Mutex<()>,
    state: Arc<Mutex<State<P>>>,
    stop_grace: Duration,
}

impl<P: ToolProcess> ProcessTasker<P> {
    pub fn new(job: Job, process: P, stop_grace: Duration) -> Self {
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        let (stdout_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (stderr_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            job_id: job.id,
            ops: Mutex::new(()),
            state: Arc::new(Mutex::new(State {
                job,
                process,
                run: None,
                chunks_tx,
                chunks_rx,
                stdout_tx,
                stderr_tx,
            })),
            stop_grace,
        }
    }

    fn spawn(&self, state: &mut State<P>, resume: bool) -> Result<()> {
        let args = if resume {
            state.process.resume_args().unwrap_or_else(|| {
                tracing::info!(
                    job_id = %self.job_id,
                    "Restore artifact missing, starting a fresh session"
                );
                state.process.start_args()
            })
        } else {
            state.process.start_args()
        };
        let program = state.process.program().to_path_buf();

        tracing::debug!(job_id = %self.job_id, program = %program.display(), ?args, "Spawning tool");

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(state.process.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(
                stdout,
                Stream::Stdout,
                state.chunks_tx.clone(),
                state.stdout_tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(
                stderr,
                Stream::Stderr,
                state.chunks_tx.clone(),
                state.stderr_tx.clone(),
            )));
        }

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(feed_stdin(stdin, stdin_rx));
        }

        let (signals_tx, signals_rx) = mpsc::channel(4);
        let (exited_tx, exited_rx) = oneshot::channel();
        state.run = Some(RunControl {
            signals: signals_tx,
            exited: exited_rx,
            stdin: stdin_tx,
        });

        tokio::spawn(supervise(
            self.job_id,
            self.state.clone(),
            child,
            pumps,
            signals_rx,
            exited_tx,
        ));
        Ok(())
    }

    /// Interrupt the tool and wait for it to exit, killing it once the grace
    /// period runs out.
    async fn stop(&self, run: RunControl) {
        let RunControl {
            signals,
            mut exited,
            ..
        } = run;

        // A closed channel means the supervisor already saw the exit.
        let _ = signals.send(StopSignal::Interrupt).await;

        if tokio::time::timeout(self.stop_grace, &mut exited)
            .await
            .is_err()
        {
            tracing::warn!(
                job_id = %self.job_id,
                grace_secs = self.stop_grace.as_secs(),
                "Tool ignored interrupt, killing it"
            );
            let _ = signals.send(StopSignal::Kill).await;
            let _ = exited.await;
        }
    }

    /// Shared tail of pause and quit. The caller has already taken the run
    /// handles under the state lock.
    ///
    /// A tool that exited on its own before the stop signal reached it keeps
    /// the status the supervisor recorded for that exit.
    async fn stop_and_mark(&self, run: Option<RunControl>, status: JobStatus) -> Job {
        if let Some(run) = run {
            self.stop(run).await;
        }

        let mut state = self.state.lock().await;
        state.drain_output();
        if state.job.status.is_finished() {
            tracing::info!(
                job_id = %self.job_id,
                status = %state.job.status,
                "Tool finished before it could be stopped"
            );
            return state.job.clone();
        }
        state.job.status = status;
        tracing::info!(job_id = %self.job_id, status = %status, "Task stopped");
        state.job.clone()
    }
}

#[async_trait]
impl<P: ToolProcess> Tasker for ProcessTasker<P> {
    async fn status(&self) -> Job {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;
        state.drain_output();
        state.job.clone()
    }

    async fn run(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;

        let status = state.job.status;
        if status.is_finished() {
            tracing::debug!(job_id = %self.job_id, %status, "Refusing to run finished job");
            return Err(Error::AlreadyFinished {
                job_id: self.job_id,
                status,
            });
        }
        if status == JobStatus::Running {
            return Ok(());
        }

        // Leftovers from the previous run belong to that run.
        state.drain_output();

        match self.spawn(&mut state, status == JobStatus::Paused) {
            Ok(()) => {
                state.job.status = JobStatus::Running;
                state.job.error = None;
                if state.job.start_time.is_none() {
                    state.job.start_time = Some(Utc::now());
                }
                tracing::info!(job_id = %self.job_id, resumed = status == JobStatus::Paused, "Task running");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to start task");
                state.job.status = JobStatus::Failed;
                state.job.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn pause(&self) -> Result<()> {
        let _op = self.ops.lock().await;
        let run = {
            let mut state = self.state.lock().await;
            state.drain_output();
            let status = state.job.status;
            match status {
                JobStatus::Paused => return Ok(()),
                JobStatus::Created => {
                    return Err(Error::InvalidTransition {
                        job_id: self.job_id,
                        status,
                        action: "pause",
                    })
                }
                s if s.is_finished() => {
                    return Err(Error::AlreadyFinished {
                        job_id: self.job_id,
                        status: s,
                    })
                }
                _ => {}
            }
            state.run.take()
        };
        let job = self.stop_and_mark(run, JobStatus::Paused).await;
        if job.status.is_finished() {
            return Err(Error::AlreadyFinished {
                job_id: self.job_id,
                status: job.status,
            });
        }
        Ok(())
    }

    async fn quit(&self) -> Job {
        let _op = self.ops.lock().await;
        let run = {
            let mut state = self.state.lock().await;
            state.drain_output();
            if state.job.status.is_finished() {
                return state.job.clone();
            }
            state.run.take()
        };
        self.stop_and_mark(run, JobStatus::Quit).await
    }

    async fn ioe(&self) -> Option<TaskIo> {
        let state = self.state.lock().await;
        let run = state.run.as_ref()?;
        Some(TaskIo {
            stdin: run.stdin.clone(),
            stdout: state.stdout_tx.subscribe(),
            stderr: state.stderr_tx.subscribe(),
        })
    }
}

/// Copy one output stream into the tasker's chunk channel and to any
/// `ioe()` subscribers until EOF.
async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: Stream,
    chunks: mpsc::UnboundedSender<Chunk>,
    tee: broadcast::Sender<String>,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                let _ = tee.send(text.clone());
                if chunks.send(Chunk { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "Output pump stopped");
                break;
            }
        }
    }
}

async fn feed_stdin(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = input.recv().await {
        if stdin.write_all(&bytes).await.is_err() || stdin.flush().await.is_err() {
            break;
        }
    }
}

/// Owns the child for the lifetime of one run: delivers stop signals and
/// records how the run ended.
///
/// An exit nobody asked for is recorded as soon as the child is reaped, so
/// a pause or quit racing with it sees the finished job. Output still in
/// the pipes is parsed once the pumps have drained.
async fn supervise<P: ToolProcess>(
    job_id: Uuid,
    state: Arc<Mutex<State<P>>>,
    mut child: Child,
    pumps: Vec<JoinHandle<()>>,
    mut signals: mpsc::Receiver<StopSignal>,
    exited: oneshot::Sender<()>,
) {
    let mut signalled = false;
    let exit = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = signals.recv() => {
                // Already gone; the request came too late to matter.
                if let Ok(Some(status)) = child.try_wait() {
                    break Ok(status);
                }
                signalled = true;
                deliver(job_id, &mut child, signal).await;
            }
        }
    };

    {
        let mut state = state.lock().await;
        state.run = None;
        if !signalled {
            let status = match exit {
                Ok(code) => {
                    let status = state.process.exit_status(code);
                    if status == JobStatus::Failed && state.job.error.is_none() {
                        state.job.error = Some(format!(
                            "{} exited with {}",
                            state.process.program().display(),
                            code
                        ));
                    }
                    status
                }
                Err(e) => {
                    state.job.error = Some(format!("failed to wait for tool: {}", e));
                    JobStatus::Failed
                }
            };
            state.job.status = status;
            state.drain_output();
            tracing::info!(job_id = %job_id, status = %status, "Tool exited");
        }
    }

    let _ = tokio::time::timeout(PUMP_DRAIN_TIMEOUT, futures::future::join_all(pumps)).await;

    let mut state = state.lock().await;
    state.drain_output();
    let State { job, process, .. } = &mut *state;
    process.collect_results(job);
    drop(state);

    let _ = exited.send(());
}

async fn deliver(job_id: Uuid, child: &mut Child, signal: StopSignal) {
    let result = match signal {
        StopSignal::Interrupt => interrupt(child).await,
        StopSignal::Kill => child.start_kill(),
    };
    if let Err(e) = result {
        tracing::warn!(job_id = %job_id, ?signal, error = %e, "Failed to signal tool, killing it");
        let _ = child.start_kill();
    }
}

#[cfg(unix)]
async fn interrupt(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let status = Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!(
            "kill -INT {} exited with {}",
            pid, status
        )))
    }
}

#[cfg(not(unix))]
async fn interrupt(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
