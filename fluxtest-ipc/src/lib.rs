#![warn(missing_docs)]
//! FluxTest IPC Protocol
//!
//! Binary protocol spoken between the supervisor and the worker processes that
//! execute a test artifact. Messages are serialized with rkyv and carried in
//! length-prefixed frames over a local domain socket whose address comes from
//! the [`EndpointAllocator`].

mod endpoint;
mod framing;
mod messages;

#[cfg(unix)]
pub use endpoint::BoundEndpoint;
pub use endpoint::{ENDPOINT_ENV, Endpoint, EndpointAllocator, EndpointError};
pub use framing::{
    FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, read_frame_async,
    write_frame, write_frame_async,
};
pub use messages::{
    SupervisorCommand, TestAssignment, TestOutcome, TestReport, WorkerHello, WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_carries_protocol_version() {
        let hello = WorkerHello::new(42, vec!["a::b".to_string()]);
        assert_eq!(hello.protocol_version, PROTOCOL_VERSION);
        assert_eq!(hello.pid, 42);
    }
}
