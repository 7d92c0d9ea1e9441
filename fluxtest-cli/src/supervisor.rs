//! Worker Pool Supervisor
//!
//! Runs one test artifact across a pool of worker processes:
//!
//! 1. bind a fresh IPC endpoint, then spawn `worker_count` copies of the
//!    artifact with the endpoint address in `FLUXTEST_ENDPOINT`
//! 2. match each inbound connection to its process by the pid in `Ready`,
//!    falling back to the next worker still waiting to connect
//! 3. once every worker is ready (or has given up), partition the tests the
//!    first ready worker discovered and send each worker its shard
//! 4. fold `TestFinished` reports into the run summary as they arrive
//! 5. resolve once every worker is `Finished` or `Crashed`
//!
//! A worker is `Finished` only if it sent its terminal message, closed its
//! channel and exited with status 0. Anything else is a crash, recorded as a
//! runner error naming the tests it never reported.

use crate::aggregator::{Aggregator, to_event};
use crate::build::BuildError;
use crate::planner;
use fluxtest_ipc::{
    ENDPOINT_ENV, EndpointAllocator, EndpointError, FrameError, PROTOCOL_VERSION,
    SupervisorCommand, TestAssignment, WorkerHello, WorkerMessage, read_frame_async,
    write_frame_async,
};
use fluxtest_report::{ReportFormat, RunReport, TestEvent};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Default grace period for a spawned worker to connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long timed-out workers get between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Failures that leave a run without a report
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The artifact could not be produced
    #[error("build failed: {0}")]
    CompileAlreadyFailed(#[from] BuildError),

    /// The run's endpoint could not be bound
    #[error("failed to open IPC endpoint: {0}")]
    Bind(#[from] EndpointError),

    /// A worker process could not be started
    #[error("failed to spawn worker {index} from {}: {source}", .artifact.display())]
    Spawn {
        /// Worker position in the pool
        index: usize,
        /// Executable that failed to start
        artifact: PathBuf,
        /// Spawn failure
        source: std::io::Error,
    },

    #[error("worker crashed: {0}")]
    /// No worker survived long enough to receive tests
    WorkerCrashed(String),

    /// The run outlived its `run_timeout`
    #[error("run did not complete within {:.1}s", .0.as_secs_f64())]
    IpcTimeout(Duration),
}

/// Number of logical cores, floor 1
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Everything one run needs. Immutable for the run's duration.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Executable launched once per worker
    pub artifact: PathBuf,
    /// Pool size, floor 1
    pub worker_count: usize,
    /// Explicit base seed; a random 32-bit seed is drawn when absent
    pub base_seed: Option<u64>,
    /// Iterations handed to randomized tests
    pub fuzz_iterations: u32,
    /// Decides whether worker stdout is passed through
    pub report_format: ReportFormat,
    /// Set when the run is one cycle of watch mode
    pub watch: bool,
    /// Only tests whose id matches are run
    pub filter: Option<Regex>,
    /// Grace period for a worker to send `Ready`
    pub connect_timeout: Duration,
    /// Bound on the whole run; `None` waits for workers indefinitely
    pub run_timeout: Option<Duration>,
    /// Extra environment for every worker
    pub env: BTreeMap<String, String>,
}

impl RunRequest {
    /// Defaults for `artifact`: one worker per core, fuzz 100, random seed
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            worker_count: default_worker_count(),
            base_seed: None,
            fuzz_iterations: 100,
            report_format: ReportFormat::default(),
            watch: false,
            filter: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            run_timeout: None,
            env: BTreeMap::new(),
        }
    }
}

/// Receives progress while a run is in flight
pub trait RunObserver {
    /// The plan is fixed: `total` tests are about to be distributed
    fn planned(&mut self, _total: usize) {}

    /// A test result was accepted by the aggregator
    fn event(&mut self, _event: &TestEvent) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct Silent;

impl RunObserver for Silent {}

/// Lifecycle of one worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process started, no `Ready` yet
    Spawning,
    /// Connected and announced its tests
    Ready,
    /// Assignments sent (or released with `Shutdown`)
    Running,
    /// Terminal: reported everything and exited cleanly
    Finished,
    /// Terminal: anything else
    Crashed,
}

/// Supervisor-side view of one worker process
#[derive(Debug)]
pub struct WorkerHandle {
    index: usize,
    pid: u32,
    state: WorkerState,
    assignments: Vec<TestAssignment>,
    writer: Option<OwnedWriteHalf>,
    kill: Option<oneshot::Sender<()>>,
    channel_open: bool,
    channel_error: Option<String>,
    finished: bool,
    released: bool,
    exit: Option<Result<ExitStatus, String>>,
}

impl WorkerHandle {
    fn new(index: usize, pid: u32, kill: oneshot::Sender<()>) -> Self {
        Self {
            index,
            pid,
            state: WorkerState::Spawning,
            assignments: Vec::new(),
            writer: None,
            kill: Some(kill),
            channel_open: false,
            channel_error: None,
            finished: false,
            released: false,
            exit: None,
        }
    }

    /// Position in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pid of the spawned process
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// `Finished` or `Crashed`
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, WorkerState::Finished | WorkerState::Crashed)
    }

    /// Ask the watcher task to SIGKILL the process
    fn request_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    /// Why this worker is not a clean finish, judged from what was observed
    fn crash_reason(&self) -> String {
        let mut reason = match &self.exit {
            Some(Err(e)) => format!("could not be waited on: {e}"),
            Some(Ok(status)) if !status.success() => format!("exited with {status}"),
            Some(Ok(_)) if self.state == WorkerState::Spawning => {
                "exited before connecting".to_string()
            }
            _ => "closed its channel without a terminal message".to_string(),
        };
        if let Some(error) = &self.channel_error {
            reason.push_str(&format!(" (channel error: {error})"));
        }
        reason
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Everything the event loop hears about, from any task
#[derive(Debug)]
enum PoolEvent {
    Connected {
        conn: usize,
        hello: WorkerHello,
        writer: OwnedWriteHalf,
    },
    Rejected {
        reason: String,
    },
    Message {
        conn: usize,
        message: WorkerMessage,
    },
    Malformed {
        conn: usize,
        error: FrameError,
    },
    Closed {
        conn: usize,
        error: Option<FrameError>,
    },
    Exited {
        index: usize,
        status: Result<ExitStatus, String>,
    },
}

/// Reap one child; kill it first if asked to (or if the handle went away)
async fn watch_child(
    index: usize,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<PoolEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    let _ = events.send(PoolEvent::Exited {
        index,
        status: status.map_err(|e| e.to_string()),
    });
}

/// Forward every frame of one connection to the event loop
async fn read_connection(
    conn: usize,
    stream: UnixStream,
    events: mpsc::UnboundedSender<PoolEvent>,
) {
    let (read_half, writer) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);

    let hello = match read_frame_async::<_, WorkerMessage>(&mut reader).await {
        Ok(WorkerMessage::Ready(hello)) => hello,
        Ok(other) => {
            let _ = events.send(PoolEvent::Rejected {
                reason: format!("expected Ready, got {other:?}"),
            });
            return;
        }
        Err(e) => {
            let _ = events.send(PoolEvent::Rejected {
                reason: e.to_string(),
            });
            return;
        }
    };

    if events
        .send(PoolEvent::Connected {
            conn,
            hello,
            writer,
        })
        .is_err()
    {
        return;
    }

    loop {
        let event = match read_frame_async::<_, WorkerMessage>(&mut reader).await {
            Ok(message) => PoolEvent::Message { conn, message },
            Err(error) if error.is_recoverable() => PoolEvent::Malformed { conn, error },
            Err(FrameError::EndOfStream) => PoolEvent::Closed { conn, error: None },
            Err(error) => PoolEvent::Closed {
                conn,
                error: Some(error),
            },
        };
        let closing = matches!(event, PoolEvent::Closed { .. });
        if events.send(event).is_err() || closing {
            return;
        }
    }
}

/// Owns the endpoint allocator across runs (one fresh endpoint per run)
#[derive(Debug, Default)]
pub struct Supervisor {
    allocator: EndpointAllocator,
}

impl Supervisor {
    /// Supervisor with sockets in the system temp directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Supervisor drawing endpoints from `allocator`
    pub fn with_allocator(allocator: EndpointAllocator) -> Self {
        Self { allocator }
    }

    /// Run the artifact across the worker pool.
    ///
    /// Worker crashes do not fail the run; they are recorded in the returned
    /// report's runner errors. An `Err` means no report could be produced.
    pub async fn run(
        &mut self,
        request: &RunRequest,
        observer: &mut dyn RunObserver,
    ) -> Result<RunReport, SupervisorError> {
        let started = Instant::now();
        let seed = planner::effective_seed(request.base_seed);
        let worker_count = request.worker_count.max(1);

        let endpoint = self.allocator.allocate();
        let listener = endpoint.bind()?;
        let address = endpoint.address();

        tracing::info!(
            artifact = %request.artifact.display(),
            workers = worker_count,
            seed,
            fuzz = request.fuzz_iterations,
            "starting run"
        );

        let (events, mut inbox) = mpsc::unbounded_channel();
        let worker_stdout = || {
            if request.report_format.is_machine_readable() {
                Stdio::null()
            } else {
                Stdio::inherit()
            }
        };

        let mut pool = Pool {
            request,
            seed,
            workers: Vec::with_capacity(worker_count),
            connections: HashMap::new(),
            aggregator: Aggregator::new(seed, request.fuzz_iterations),
            discovered: None,
            distributed: false,
            observer,
        };

        for index in 0..worker_count {
            let child = Command::new(&request.artifact)
                .env(ENDPOINT_ENV, &address)
                .envs(&request.env)
                .stdin(Stdio::null())
                .stdout(worker_stdout())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| SupervisorError::Spawn {
                    index,
                    artifact: request.artifact.clone(),
                    source,
                })?;

            let pid = child.id().unwrap_or_default();
            tracing::debug!(worker = index, pid, "spawned worker");

            let (kill, kill_rx) = oneshot::channel();
            tokio::spawn(watch_child(index, child, kill_rx, events.clone()));
            pool.workers.push(WorkerHandle::new(index, pid, kill));
        }

        let connect_deadline = started + request.connect_timeout;
        let run_deadline = request.run_timeout.map(|timeout| started + timeout);
        let mut next_conn = 0usize;

        loop {
            if !pool.distributed && pool.all_connected_or_gone() {
                pool.distribute().await?;
            }
            if pool.distributed && pool.workers.iter().all(WorkerHandle::is_terminal) {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        tokio::spawn(read_connection(next_conn, stream, events.clone()));
                        next_conn += 1;
                    }
                    Err(e) => tracing::warn!("failed to accept worker connection: {e}"),
                },
                Some(event) = inbox.recv() => pool.handle(event),
                _ = tokio::time::sleep_until(connect_deadline), if !pool.distributed => {
                    pool.expire_connect();
                }
                _ = tokio::time::sleep_until(run_deadline.unwrap_or(connect_deadline)),
                    if run_deadline.is_some() =>
                {
                    let timeout = request.run_timeout.unwrap_or_default();
                    pool.terminate().await;
                    return Err(SupervisorError::IpcTimeout(timeout));
                }
            }
        }

        drop(listener);
        let report = pool.aggregator.into_report(started.elapsed());
        tracing::debug!(
            total = report.summary.total_tests,
            failed = report.summary.failed,
            runner_errors = report.summary.runner_errors.len(),
            "run settled"
        );
        Ok(report)
    }
}

/// Per-run event loop state
struct Pool<'a> {
    request: &'a RunRequest,
    seed: u64,
    workers: Vec<WorkerHandle>,
    /// Connection id to worker index
    connections: HashMap<usize, usize>,
    aggregator: Aggregator,
    discovered: Option<Vec<String>>,
    distributed: bool,
    observer: &'a mut dyn RunObserver,
}

impl Pool<'_> {
    fn all_connected_or_gone(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.state != WorkerState::Spawning)
    }

    fn handle(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Connected {
                conn,
                hello,
                writer,
            } => self.on_connected(conn, hello, writer),
            PoolEvent::Rejected { reason } => {
                tracing::warn!("rejected worker connection: {reason}");
                self.aggregator
                    .record_error(format!("rejected worker connection: {reason}"));
            }
            PoolEvent::Message { conn, message } => {
                if let Some(index) = self.live_worker(conn) {
                    self.on_message(index, message);
                }
            }
            PoolEvent::Malformed { conn, error } => {
                if let Some(index) = self.live_worker(conn) {
                    tracing::warn!(worker = index, "malformed report dropped: {error}");
                    self.aggregator.record_error(format!(
                        "worker {index}: malformed report dropped: {error}"
                    ));
                }
            }
            PoolEvent::Closed { conn, error } => {
                if let Some(&index) = self.connections.get(&conn) {
                    let worker = &mut self.workers[index];
                    worker.channel_open = false;
                    worker.writer = None;
                    worker.channel_error = error.map(|e| e.to_string());
                    self.settle(index);
                }
            }
            PoolEvent::Exited { index, status } => {
                tracing::debug!(worker = index, ?status, "worker exited");
                self.workers[index].exit = Some(status);
                self.settle(index);
            }
        }
    }

    fn live_worker(&self, conn: usize) -> Option<usize> {
        self.connections
            .get(&conn)
            .copied()
            .filter(|&index| !self.workers[index].is_terminal())
    }

    fn on_connected(&mut self, conn: usize, hello: WorkerHello, writer: OwnedWriteHalf) {
        let Some(index) = self.claim(hello.pid) else {
            tracing::warn!(pid = hello.pid, "connection with no worker left to claim dropped");
            return;
        };

        self.connections.insert(conn, index);
        self.workers[index].channel_open = true;

        if hello.protocol_version != PROTOCOL_VERSION {
            self.crash(
                index,
                format!(
                    "speaks protocol version {} (expected {})",
                    hello.protocol_version, PROTOCOL_VERSION
                ),
            );
            return;
        }

        tracing::debug!(
            worker = index,
            pid = hello.pid,
            tests = hello.tests.len(),
            "worker ready"
        );
        let worker = &mut self.workers[index];
        worker.writer = Some(writer);
        worker.state = WorkerState::Ready;
        if self.discovered.is_none() {
            self.discovered = Some(hello.tests);
        }
    }

    /// Pick the worker a new connection belongs to.
    ///
    /// The pid in `Ready` wins. An artifact started through a wrapper that
    /// does not `exec` connects from a descendant pid, so an unknown pid takes
    /// the first worker still waiting to connect.
    fn claim(&self, pid: u32) -> Option<usize> {
        let waiting = |w: &&WorkerHandle| w.state == WorkerState::Spawning;
        self.workers
            .iter()
            .filter(waiting)
            .find(|w| w.pid == pid)
            .or_else(|| self.workers.iter().find(waiting))
            .map(WorkerHandle::index)
    }

    fn on_message(&mut self, index: usize, message: WorkerMessage) {
        match message {
            WorkerMessage::TestFinished(report) => {
                let assigned = self.workers[index]
                    .assignments
                    .iter()
                    .any(|a| a.test_id == report.test_id);
                if !assigned {
                    tracing::warn!(
                        worker = index,
                        test = %report.test_id,
                        "unassigned report dropped"
                    );
                    self.aggregator.record_error(format!(
                        "worker {index} reported unassigned test {}; dropped",
                        report.test_id
                    ));
                    return;
                }
                if let Some(event) = self.aggregator.record(to_event(index, report)) {
                    self.observer.event(event);
                }
            }
            WorkerMessage::Finished { reported } => {
                tracing::debug!(worker = index, reported, "worker finished its shard");
                self.workers[index].finished = true;
            }
            WorkerMessage::Log { message } => {
                tracing::info!(worker = index, "{message}");
            }
            WorkerMessage::Ready(_) => {
                self.aggregator
                    .record_error(format!("worker {index} sent Ready twice; ignored"));
            }
        }
    }

    /// Partition the discovered tests over the ready workers and send shards
    async fn distribute(&mut self) -> Result<(), SupervisorError> {
        self.distributed = true;

        let ready: Vec<usize> = self
            .workers
            .iter()
            .filter(|w| w.state == WorkerState::Ready)
            .map(WorkerHandle::index)
            .collect();

        if ready.is_empty() {
            let reasons = self.aggregator.summary().runner_errors.join("; ");
            return Err(SupervisorError::WorkerCrashed(format!(
                "none of the {} workers became ready: {reasons}",
                self.workers.len()
            )));
        }

        let plan = planner::build_plan(
            self.discovered.take().unwrap_or_default(),
            self.request.filter.as_ref(),
        );
        tracing::info!(
            tests = plan.len(),
            workers = ready.len(),
            seed = self.seed,
            "distributing tests"
        );
        self.observer.planned(plan.len());

        let shards = plan.assign(ready.len(), self.seed, self.request.fuzz_iterations);
        for (index, shard) in ready.into_iter().zip(shards) {
            let command = if shard.is_empty() {
                SupervisorCommand::Shutdown
            } else {
                SupervisorCommand::Run {
                    assignments: shard.clone(),
                    fuzz_iterations: self.request.fuzz_iterations,
                }
            };

            let worker = &mut self.workers[index];
            worker.released = shard.is_empty();
            worker.assignments = shard;
            worker.state = WorkerState::Running;

            let sent = match worker.writer.as_mut() {
                Some(writer) => write_frame_async(writer, &command).await,
                None => Err(FrameError::EndOfStream),
            };
            if let Err(e) = sent {
                self.crash(index, format!("could not receive its assignments: {e}"));
            }
        }

        Ok(())
    }

    /// Workers still not ready at the connect deadline are killed
    fn expire_connect(&mut self) {
        let timeout = self.request.connect_timeout;
        let late: Vec<usize> = self
            .workers
            .iter()
            .filter(|w| w.state == WorkerState::Spawning)
            .map(WorkerHandle::index)
            .collect();
        for index in late {
            self.crash(
                index,
                format!("did not connect within {:.1}s", timeout.as_secs_f64()),
            );
        }
    }

    /// Move a worker to a terminal state once both its channel and its
    /// process are done
    fn settle(&mut self, index: usize) {
        let worker = &self.workers[index];
        if worker.is_terminal() || worker.exit.is_none() || worker.channel_open {
            return;
        }

        let clean_exit = matches!(worker.exit, Some(Ok(status)) if status.success());
        let completed =
            worker.state == WorkerState::Running && (worker.finished || worker.released);
        if !(clean_exit && completed) {
            let reason = worker.crash_reason();
            self.crash(index, reason);
            return;
        }

        let missing = self.aggregator.unreported(&worker.assignments);
        if !missing.is_empty() {
            let error = format!(
                "worker {index} finished without reporting {} assigned tests: {}",
                missing.len(),
                missing.join(", ")
            );
            self.aggregator.record_error(error);
        }
        tracing::debug!(worker = index, "worker finished");
        self.workers[index].state = WorkerState::Finished;
    }

    fn crash(&mut self, index: usize, reason: String) {
        let worker = &mut self.workers[index];
        if worker.is_terminal() {
            return;
        }
        worker.state = WorkerState::Crashed;
        worker.writer = None;
        worker.request_kill();

        let missing = self.aggregator.unreported(&worker.assignments);
        let mut error = format!("worker {index} (pid {}) crashed: {reason}", worker.pid);
        if !missing.is_empty() {
            error.push_str(&format!(
                "; {} assigned tests unreported: {}",
                missing.len(),
                missing.join(", ")
            ));
        }
        tracing::warn!("{error}");
        self.aggregator.record_error(error);
    }

    /// SIGTERM every live worker, give them a moment, then kill the rest
    async fn terminate(&mut self) {
        for worker in self.workers.iter().filter(|w| !w.is_terminal()) {
            if let Err(e) = send_sigterm(worker.pid) {
                tracing::debug!(worker = worker.index, "SIGTERM not delivered: {e}");
            }
        }
        tokio::time::sleep(TERM_GRACE).await;
        for worker in &mut self.workers {
            worker.request_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxtest_ipc::{TestOutcome, TestReport};
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("artifact.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request(artifact: PathBuf, workers: usize) -> RunRequest {
        RunRequest {
            worker_count: workers,
            base_seed: Some(1),
            report_format: ReportFormat::Json,
            ..RunRequest::new(artifact)
        }
    }

    #[tokio::test]
    async fn test_workers_exiting_before_connect() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = script(dir.path(), "exit 3");
        let mut supervisor = Supervisor::with_allocator(EndpointAllocator::with_dir(dir.path()));

        let result = supervisor.run(&request(artifact, 2), &mut Silent).await;
        match result {
            Err(SupervisorError::WorkerCrashed(message)) => {
                assert!(message.contains("none of the 2 workers"), "{message}");
                assert!(message.contains("exited with"), "{message}");
            }
            other => panic!("expected WorkerCrashed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_worker_hits_connect_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = script(dir.path(), "exec sleep 30");
        let mut supervisor = Supervisor::with_allocator(EndpointAllocator::with_dir(dir.path()));

        let mut request = request(artifact, 1);
        request.connect_timeout = Duration::from_millis(200);

        let started = std::time::Instant::now();
        let result = supervisor.run(&request, &mut Silent).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        match result {
            Err(SupervisorError::WorkerCrashed(message)) => {
                assert!(message.contains("did not connect"), "{message}");
            }
            other => panic!("expected WorkerCrashed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::with_allocator(EndpointAllocator::with_dir(dir.path()));
        let result = supervisor
            .run(&request(dir.path().join("absent"), 1), &mut Silent)
            .await;
        assert!(matches!(result, Err(SupervisorError::Spawn { index: 0, .. })));
    }

    #[test]
    fn test_crash_reason_wording() {
        let (kill, _rx) = oneshot::channel();
        let mut worker = WorkerHandle::new(0, 1, kill);
        worker.channel_error = Some("frame too large".to_string());
        worker.state = WorkerState::Running;
        let reason = worker.crash_reason();
        assert!(reason.starts_with("closed its channel without a terminal message"));
        assert!(reason.contains("frame too large"));
    }

    fn pool<'a>(
        request: &'a RunRequest,
        observer: &'a mut dyn RunObserver,
        pids: &[u32],
    ) -> Pool<'a> {
        let workers = pids
            .iter()
            .enumerate()
            .map(|(index, &pid)| {
                let (kill, _rx) = oneshot::channel();
                WorkerHandle::new(index, pid, kill)
            })
            .collect();
        Pool {
            request,
            seed: 1,
            workers,
            connections: HashMap::new(),
            aggregator: Aggregator::new(1, 10),
            discovered: None,
            distributed: false,
            observer,
        }
    }

    fn passed(test_id: &str) -> WorkerMessage {
        WorkerMessage::TestFinished(TestReport {
            test_id: test_id.to_string(),
            outcome: TestOutcome::Pass,
            duration_nanos: 1_000,
            failure_messages: vec![],
            seed: 9,
        })
    }

    #[test]
    fn test_claim_prefers_pid_then_first_waiting_worker() {
        let request = RunRequest::new("artifact");
        let mut observer = Silent;
        let mut pool = pool(&request, &mut observer, &[100, 200, 300]);

        assert_eq!(pool.claim(200), Some(1));
        // A wrapped artifact connects from a pid nobody spawned
        assert_eq!(pool.claim(4242), Some(0));

        pool.workers[0].state = WorkerState::Ready;
        assert_eq!(pool.claim(4242), Some(1));
        assert_eq!(pool.claim(300), Some(2));

        pool.workers[1].state = WorkerState::Ready;
        pool.workers[2].state = WorkerState::Crashed;
        assert_eq!(pool.claim(4242), None);
        assert_eq!(pool.claim(300), None);
    }

    #[test]
    fn test_unassigned_report_is_not_counted() {
        let request = RunRequest::new("artifact");
        let mut observer = Silent;
        let mut pool = pool(&request, &mut observer, &[100]);
        pool.workers[0].state = WorkerState::Running;
        pool.workers[0].assignments = vec![TestAssignment {
            test_id: "parser::empty".to_string(),
            seed: 9,
        }];

        pool.on_message(0, passed("parser::ghost"));
        pool.on_message(0, passed("parser::empty"));

        let summary = pool.aggregator.summary();
        assert_eq!(summary.total_tests, 1);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.runner_errors.len(), 1);
        assert!(
            summary.runner_errors[0].contains("unassigned test parser::ghost"),
            "{:?}",
            summary.runner_errors
        );
    }
}
