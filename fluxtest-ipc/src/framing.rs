//! Length-Prefixed Frame Encoding
//!
//! Provides reliable message boundaries over the stream socket shared by the
//! supervisor and a worker. The worker side is blocking; the supervisor side
//! drives the same format through tokio.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload either side will send or accept (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame-level failures
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message could not be archived
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The frame was read completely but its payload did not validate.
    /// The stream is still aligned on the next frame boundary.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced payload size
        size: usize,
        /// Limit in force
        max: usize,
    },

    /// The frame is structurally invalid (e.g. zero length)
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The peer closed the stream between frames
    #[error("End of stream")]
    EndOfStream,
}

impl FrameError {
    /// Whether the reader can keep consuming frames after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::Deserialization(_) | FrameError::InvalidFrame(_)
        )
    }
}

fn encode<T>(message: &T) -> Result<AlignedVec, FrameError>
where
    T: Serialize<AllocSerializer<256>>,
{
    let payload =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;
    match payload.len() {
        size if size > MAX_FRAME_SIZE => Err(FrameError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        }),
        _ => Ok(payload),
    }
}

/// Socket buffer size on the blocking (worker) side
const STREAM_BUFFER: usize = 64 * 1024;

/// Turn the outcome of reading a 4-byte header into a payload length.
///
/// A clean EOF before the header is the peer hanging up between frames.
fn payload_len(header: std::io::Result<[u8; 4]>) -> Result<usize, FrameError> {
    let header = header.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => FrameError::EndOfStream,
        _ => FrameError::Io(e),
    })?;

    match u32::from_le_bytes(header) as usize {
        0 => Err(FrameError::InvalidFrame("zero-length frame".to_string())),
        size if size > MAX_FRAME_SIZE => Err(FrameError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        }),
        size => Ok(size),
    }
}

fn payload_buffer(len: usize) -> AlignedVec {
    let mut buf = AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    buf
}

fn decode<T>(buf: &AlignedVec) -> Result<T, FrameError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let archived = rkyv::check_archived_root::<T>(buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    Ok(archived
        .deserialize(&mut Infallible)
        .unwrap_or_else(|never| match never {}))
}

/// Write one framed message and flush it.
///
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let payload = encode(message)?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    // Each report must reach the supervisor as soon as the test ends
    writer.flush()?;
    Ok(())
}

/// Read one framed message, blocking until it is complete
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut header = [0u8; 4];
    let len = payload_len(reader.read_exact(&mut header).map(|()| header))?;

    let mut payload = payload_buffer(len);
    reader.read_exact(&mut payload)?;
    decode(&payload)
}

/// Async counterpart of [`write_frame`]
pub async fn write_frame_async<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize<AllocSerializer<256>>,
{
    let payload = encode(message)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Async counterpart of [`read_frame`]
///
/// A payload that fails validation is fully consumed before
/// [`FrameError::Deserialization`] is returned, so the caller may keep reading.
pub async fn read_frame_async<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut header = [0u8; 4];
    let len = payload_len(reader.read_exact(&mut header).await.map(|_| header))?;

    let mut payload = payload_buffer(len);
    reader.read_exact(&mut payload).await?;
    decode(&payload)
}

/// Blocking message sink used by the worker
pub struct FrameWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a stream in a buffered frame writer
    pub fn new(stream: W) -> Self {
        Self {
            inner: BufWriter::with_capacity(STREAM_BUFFER, stream),
        }
    }

    /// Send one message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.inner, message)
    }
}

/// Blocking message source used by the worker
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a stream in a buffered frame reader
    pub fn new(stream: R) -> Self {
        Self {
            inner: BufReader::with_capacity(STREAM_BUFFER, stream),
        }
    }

    /// Receive one message
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SupervisorCommand, TestAssignment, TestOutcome, TestReport, WorkerMessage};
    use std::io::Cursor;

    fn report(id: &str) -> WorkerMessage {
        WorkerMessage::TestFinished(TestReport {
            test_id: id.to_string(),
            outcome: TestOutcome::Fail,
            duration_nanos: 1_500_000,
            failure_messages: vec!["Expected true, got false".to_string()],
            seed: 7,
        })
    }

    #[test]
    fn test_ordered_stream() {
        let messages = vec![
            report("math::adds"),
            report("math::subtracts"),
            WorkerMessage::Finished { reported: 2 },
        ];

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for msg in &messages {
                writer.write(msg).unwrap();
            }
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        for expected in &messages {
            let decoded: WorkerMessage = reader.read().unwrap();
            assert_eq!(expected, &decoded);
        }
        let end: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(end, Err(FrameError::EndOfStream)));
    }

    #[test]
    fn test_zero_length_frame_rejected() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8, 0, 0, 0]));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::InvalidFrame(_))));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let len = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
        let mut reader = FrameReader::new(Cursor::new(len.to_vec()));
        let result: Result<WorkerMessage, _> = reader.read();
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_async_garbage_frame_is_recoverable() {
        let mut buffer = Vec::new();
        // A frame whose payload is not a valid archive
        buffer.extend_from_slice(&8u32.to_le_bytes());
        buffer.extend_from_slice(&[0xff; 8]);
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer
                .write(&WorkerMessage::Finished { reported: 0 })
                .unwrap();
        }

        let mut cursor = Cursor::new(buffer);
        let first: Result<WorkerMessage, _> = read_frame_async(&mut cursor).await;
        let err = first.unwrap_err();
        assert!(err.is_recoverable(), "unexpected error: {err}");

        let second: WorkerMessage = read_frame_async(&mut cursor).await.unwrap();
        assert_eq!(second, WorkerMessage::Finished { reported: 0 });
    }

    #[tokio::test]
    async fn test_async_write_read_into_sync_reader() {
        let cmd = SupervisorCommand::Run {
            assignments: vec![TestAssignment {
                test_id: "parser::empty".to_string(),
                seed: 99,
            }],
            fuzz_iterations: 100,
        };

        let mut buffer = Vec::new();
        write_frame_async(&mut buffer, &cmd).await.unwrap();

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let decoded: SupervisorCommand = reader.read().unwrap();
        assert_eq!(decoded, cmd);
    }
}
