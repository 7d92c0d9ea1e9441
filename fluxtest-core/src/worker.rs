//! Worker Process Entry Point
//!
//! Handles the worker side of the supervisor-worker architecture. The artifact
//! is launched with `FLUXTEST_ENDPOINT` set; its first action is to connect
//! and announce the tests it contains. It then runs the single partition the
//! supervisor assigns, reports every test, sends a terminal `Finished`
//! message and exits.
//!
//! A SIGTERM handler lets the supervisor stop a worker after its current
//! test. Such a worker exits without `Finished`, so the supervisor accounts
//! for the tests it never ran.

use crate::{TestDef, registered_tests, run_test};
use fluxtest_ipc::{
    Endpoint, FrameError, FrameReader, FrameWriter, SupervisorCommand, TestOutcome, TestReport,
    WorkerHello, WorkerMessage,
};
use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Errors that end a worker
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The artifact was started outside the runner
    #[error("FLUXTEST_ENDPOINT is not set; this artifact must be launched by `fluxtest`")]
    NoEndpoint,

    /// The endpoint refused the connection
    #[error("failed to connect to supervisor at {endpoint}: {source}")]
    Connect {
        /// Address taken from the environment
        endpoint: String,
        /// Connect failure
        source: std::io::Error,
    },

    /// The protocol stream broke
    #[error("IPC error: {0}")]
    Frame(#[from] FrameError),
}

/// Worker main loop
pub struct WorkerMain {
    reader: FrameReader<UnixStream>,
    writer: FrameWriter<UnixStream>,
    tests: Vec<&'static TestDef>,
}

impl WorkerMain {
    /// Connect to the endpoint named by `FLUXTEST_ENDPOINT`, serving every
    /// registered test.
    pub fn connect() -> Result<Self, WorkerError> {
        let endpoint = Endpoint::from_env().ok_or(WorkerError::NoEndpoint)?;
        let stream = endpoint.connect().map_err(|source| WorkerError::Connect {
            endpoint: endpoint.address(),
            source,
        })?;
        Self::with_stream(stream, registered_tests())
    }

    /// Serve `tests` over an already connected stream
    pub fn with_stream(
        stream: UnixStream,
        tests: Vec<&'static TestDef>,
    ) -> Result<Self, WorkerError> {
        let read_half = stream.try_clone().map_err(FrameError::Io)?;
        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(stream),
            tests,
        })
    }

    /// Run the worker protocol until the assigned partition is done
    pub fn run(&mut self) -> Result<(), WorkerError> {
        install_sigterm_handler();

        let ids = self.tests.iter().map(|t| t.id.to_string()).collect();
        self.writer
            .write(&WorkerMessage::Ready(WorkerHello::new(std::process::id(), ids)))?;

        loop {
            if shutdown_requested() {
                return Ok(());
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                // Supervisor went away; nothing left to report to
                Err(FrameError::EndOfStream) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            match command {
                SupervisorCommand::Run {
                    assignments,
                    fuzz_iterations,
                } => {
                    let mut reported = 0u32;
                    for assignment in &assignments {
                        if shutdown_requested() {
                            return Ok(());
                        }
                        let report =
                            self.run_one(&assignment.test_id, assignment.seed, fuzz_iterations);
                        self.writer.write(&WorkerMessage::TestFinished(report))?;
                        reported += 1;
                    }
                    self.writer.write(&WorkerMessage::Finished { reported })?;
                    return Ok(());
                }
                SupervisorCommand::Shutdown => return Ok(()),
            }
        }
    }

    fn run_one(&self, test_id: &str, seed: u64, fuzz_iterations: u32) -> TestReport {
        match self.tests.iter().find(|t| t.id == test_id) {
            Some(def) => run_test(def, seed, fuzz_iterations),
            None => TestReport {
                test_id: test_id.to_string(),
                outcome: TestOutcome::Fail,
                duration_nanos: 0,
                failure_messages: vec![format!("Test not found in artifact: {}", test_id)],
                seed,
            },
        }
    }
}

/// Entry point for a test artifact's `main`.
///
/// Without `FLUXTEST_ENDPOINT` the artifact lists its tests and exits with a
/// usage error.
pub fn artifact_main() -> ExitCode {
    let mut worker = match WorkerMain::connect() {
        Ok(worker) => worker,
        Err(WorkerError::NoEndpoint) => {
            eprintln!("fluxtest: {}", WorkerError::NoEndpoint);
            for test in registered_tests() {
                println!("{} ({}:{})", test.id, test.file, test.line);
            }
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("fluxtest: worker error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match worker.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fluxtest: worker error: {e}");
            ExitCode::FAILURE
        }
    }
}
