//! IPC Message Types
//!
//! All messages are serialized with rkyv and validated on receipt.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Self-reported outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum TestOutcome {
    /// Test passed
    Pass,
    /// Test failed; see `failure_messages`
    Fail,
    /// Test was skipped
    Skip,
    /// Test is a placeholder that has not been written yet
    Todo,
}

/// One test handed to a worker, with the seed it must use
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TestAssignment {
    /// Namespaced test identifier (`module::test`)
    pub test_id: String,
    /// Seed derived from the run's base seed for this test
    pub seed: u64,
}

/// Result of one test as reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TestReport {
    /// Namespaced test identifier
    pub test_id: String,
    /// Outcome category
    pub outcome: TestOutcome,
    /// Wall-clock duration in nanoseconds
    pub duration_nanos: u64,
    /// Ordered failure messages (empty unless `outcome` is `Fail`)
    pub failure_messages: Vec<String>,
    /// Seed the test actually ran with
    pub seed: u64,
}

/// Handshake sent by a worker as its first message
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerHello {
    /// OS process id of the worker, used to match the connection to its process
    pub pid: u32,
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Test identifiers the artifact declares, in discovery order
    pub tests: Vec<String>,
}

impl WorkerHello {
    /// Build a handshake for the current protocol version
    pub fn new(pid: u32, tests: Vec<String>) -> Self {
        Self {
            pid,
            protocol_version: crate::PROTOCOL_VERSION,
            tests,
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Worker connected and is ready for work
    Ready(WorkerHello),

    /// One assigned test completed
    TestFinished(TestReport),

    /// Terminal message: every assigned test has been reported
    Finished {
        /// Number of tests this worker reported
        reported: u32,
    },

    /// Diagnostic line from the artifact, logged by the supervisor
    Log {
        /// Message text
        message: String,
    },
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run the given partition
    Run {
        /// Tests to run, in order
        assignments: Vec<TestAssignment>,
        /// Iterations each randomized test should perform
        fuzz_iterations: u32,
    },

    /// Stop after the current test and exit
    Shutdown,
}

impl SupervisorCommand {
    /// Number of tests carried by a `Run` command
    pub fn assignment_count(&self) -> usize {
        match self {
            SupervisorCommand::Run { assignments, .. } => assignments.len(),
            SupervisorCommand::Shutdown => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_count() {
        let cmd = SupervisorCommand::Run {
            assignments: vec![
                TestAssignment {
                    test_id: "a::one".to_string(),
                    seed: 1,
                },
                TestAssignment {
                    test_id: "a::two".to_string(),
                    seed: 2,
                },
            ],
            fuzz_iterations: 100,
        };
        assert_eq!(cmd.assignment_count(), 2);
        assert_eq!(SupervisorCommand::Shutdown.assignment_count(), 0);
    }
}
