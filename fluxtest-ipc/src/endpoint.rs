//! IPC Endpoint Allocation
//!
//! Every run gets its own channel address so that concurrent runs on one host
//! (several `fluxtest` invocations, or successive watch cycles) never share a
//! socket. The address combines the owning process id with a counter held by
//! the allocator itself.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable through which a worker learns its endpoint address
pub const ENDPOINT_ENV: &str = "FLUXTEST_ENDPOINT";

const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Errors raised while binding or connecting an endpoint
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The listener could not be created
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Endpoint address
        address: String,
        /// Bind failure
        source: std::io::Error,
    },

    /// A leftover socket file could not be removed
    #[error("failed to remove stale endpoint {}: {source}", .path.display())]
    StaleCleanup {
        /// Socket file path
        path: PathBuf,
        /// Removal failure
        source: std::io::Error,
    },

    /// Something other than a socket sits at the endpoint path
    #[error("refusing to replace {}: not a socket", .path.display())]
    NotASocket {
        /// Offending path
        path: PathBuf,
    },

    /// The transport is not available on this platform
    #[error("endpoint {0} is not supported on this platform")]
    Unsupported(String),
}

/// A local channel address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Filesystem-backed Unix domain socket
    Socket(PathBuf),
    /// Windows named pipe
    Pipe(String),
}

impl Endpoint {
    /// Address string handed to workers through [`ENDPOINT_ENV`]
    pub fn address(&self) -> String {
        match self {
            Endpoint::Socket(path) => path.display().to_string(),
            Endpoint::Pipe(name) => name.clone(),
        }
    }

    /// Parse an address produced by [`Endpoint::address`]
    pub fn from_address(address: &str) -> Self {
        if address.starts_with(PIPE_PREFIX) {
            Endpoint::Pipe(address.to_string())
        } else {
            Endpoint::Socket(PathBuf::from(address))
        }
    }

    /// Read the endpoint a worker was launched with
    pub fn from_env() -> Option<Self> {
        std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| Self::from_address(&s))
    }

    /// Bind a listener on this endpoint, replacing a stale socket left by a
    /// crashed run. Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn bind(&self) -> Result<BoundEndpoint, EndpointError> {
        let path = match self {
            Endpoint::Socket(path) => path,
            Endpoint::Pipe(name) => return Err(EndpointError::Unsupported(name.clone())),
        };

        remove_stale_socket(path)?;

        let listener =
            tokio::net::UnixListener::bind(path).map_err(|source| EndpointError::Bind {
                address: self.address(),
                source,
            })?;

        tracing::debug!(endpoint = %path.display(), "bound IPC endpoint");

        Ok(BoundEndpoint {
            listener,
            path: path.clone(),
        })
    }

    /// Blocking connect used by the worker side
    #[cfg(unix)]
    pub fn connect(&self) -> std::io::Result<std::os::unix::net::UnixStream> {
        match self {
            Endpoint::Socket(path) => std::os::unix::net::UnixStream::connect(path),
            Endpoint::Pipe(name) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("named pipe {name} on a unix host"),
            )),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address())
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> Result<(), EndpointError> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::warn!(endpoint = %path.display(), "removing stale IPC socket");
            std::fs::remove_file(path).map_err(|source| EndpointError::StaleCleanup {
                path: path.to_path_buf(),
                source,
            })
        }
        Ok(_) => Err(EndpointError::NotASocket {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EndpointError::StaleCleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A listening endpoint; the socket file is removed when this is dropped
#[cfg(unix)]
#[derive(Debug)]
pub struct BoundEndpoint {
    listener: tokio::net::UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl BoundEndpoint {
    /// Accept the next worker connection
    pub async fn accept(&self) -> std::io::Result<tokio::net::UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Path of the bound socket
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for BoundEndpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Hands out collision-free endpoint addresses for one process
#[derive(Debug)]
pub struct EndpointAllocator {
    pid: u32,
    next: u64,
    dir: PathBuf,
}

impl EndpointAllocator {
    /// Allocator for the current process, placing sockets in the temp directory
    pub fn new() -> Self {
        Self::with_dir(std::env::temp_dir())
    }

    /// Allocator for the current process, placing sockets in `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::for_process(std::process::id(), dir)
    }

    /// Allocator for an explicit process id
    pub fn for_process(pid: u32, dir: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            next: 0,
            dir: dir.into(),
        }
    }

    /// Number of endpoints handed out so far
    pub fn allocated(&self) -> u64 {
        self.next
    }

    /// Allocate the next endpoint address
    pub fn allocate(&mut self) -> Endpoint {
        self.next += 1;
        let name = format!("fluxtest-{}-{}", self.pid, self.next);

        if cfg!(windows) {
            Endpoint::Pipe(format!("{PIPE_PREFIX}{name}"))
        } else {
            Endpoint::Socket(self.dir.join(format!("{name}.sock")))
        }
    }
}

impl Default for EndpointAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_addresses_unique_within_process() {
        let mut allocator = EndpointAllocator::for_process(1234, "/tmp");
        let addresses: HashSet<_> = (0..100).map(|_| allocator.allocate()).collect();
        assert_eq!(addresses.len(), 100);
        assert_eq!(allocator.allocated(), 100);
    }

    #[test]
    fn test_addresses_differ_across_processes() {
        let mut a = EndpointAllocator::for_process(1, "/tmp");
        let mut b = EndpointAllocator::for_process(2, "/tmp");
        assert_ne!(a.allocate(), b.allocate());
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_name_embeds_pid_and_counter() {
        let mut allocator = EndpointAllocator::for_process(77, "/tmp");
        allocator.allocate();
        let second = allocator.allocate();
        assert_eq!(second, Endpoint::Socket(PathBuf::from("/tmp/fluxtest-77-2.sock")));
    }

    #[test]
    fn test_address_parse() {
        let pipe = Endpoint::from_address(r"\\.\pipe\fluxtest-1-1");
        assert!(matches!(pipe, Endpoint::Pipe(_)));
        let socket = Endpoint::from_address("/tmp/fluxtest-1-1.sock");
        assert_eq!(socket.address(), "/tmp/fluxtest-1-1.sock");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut allocator = EndpointAllocator::with_dir(dir.path());
        let endpoint = allocator.allocate();
        let Endpoint::Socket(path) = &endpoint else {
            panic!("expected a socket endpoint");
        };

        // Leave a socket file behind, as a crashed run would
        let stale = std::os::unix::net::UnixListener::bind(path).unwrap();
        drop(stale);
        assert!(path.exists());

        let bound = endpoint.bind().unwrap();
        assert_eq!(bound.path(), path.as_path());

        let client = tokio::net::UnixStream::connect(path).await;
        assert!(client.is_ok());

        drop(bound);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket.sock");
        std::fs::write(&path, b"data").unwrap();

        let err = Endpoint::Socket(path.clone()).bind().unwrap_err();
        assert!(matches!(err, EndpointError::NotASocket { .. }));
        assert!(path.exists());
    }
}
