//! Artifact Build
//!
//! Compiling tests into a runnable artifact is left to the project's own
//! toolchain. The runner only needs a path at the end, so the seam is one
//! trait with two implementations: a prebuilt path, or a shell command that
//! produces it.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

/// Why no artifact is available for a run
#[derive(Debug, Error)]
pub enum BuildError {
    /// Neither `--artifact` nor `[build] artifact` was given
    #[error("no test artifact configured; pass --artifact or set [build] artifact in fluxtest.toml")]
    NoArtifact,

    /// The artifact path does not name a file
    #[error("test artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// The build command could not be started
    #[error("failed to launch build command `{command}`: {source}")]
    Launch {
        /// Shell command as configured
        command: String,
        /// Spawn failure
        source: std::io::Error,
    },

    /// The build command exited unsuccessfully
    #[error("build command `{command}` failed: {status}")]
    Failed {
        /// Shell command as configured
        command: String,
        /// Its exit status
        status: ExitStatus,
    },
}

/// Produces the artifact for one run
pub trait BuildOrchestrator: Send + Sync {
    /// Build (or locate) the artifact.
    ///
    /// With `machine_readable` set, nothing may reach stdout.
    fn build(&self, machine_readable: bool) -> Result<PathBuf, BuildError>;
}

fn existing(path: &Path) -> Result<PathBuf, BuildError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(BuildError::ArtifactMissing(path.to_path_buf()))
    }
}

/// An artifact that is already built
#[derive(Debug, Clone)]
pub struct PrebuiltArtifact {
    path: PathBuf,
}

impl PrebuiltArtifact {
    /// Use `path` as-is
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BuildOrchestrator for PrebuiltArtifact {
    fn build(&self, _machine_readable: bool) -> Result<PathBuf, BuildError> {
        existing(&self.path)
    }
}

/// Runs a shell command, then expects the artifact at a fixed path
#[derive(Debug, Clone)]
pub struct CommandBuild {
    command: String,
    artifact: PathBuf,
}

impl CommandBuild {
    /// Run `command`, then expect the artifact at `artifact`
    pub fn new(command: impl Into<String>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            artifact: artifact.into(),
        }
    }

    fn shell(&self) -> Command {
        #[cfg(unix)]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        }
        #[cfg(not(unix))]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        }
    }
}

impl BuildOrchestrator for CommandBuild {
    fn build(&self, machine_readable: bool) -> Result<PathBuf, BuildError> {
        tracing::info!(command = %self.command, "building test artifact");

        let stdout = if machine_readable {
            Stdio::null()
        } else {
            Stdio::inherit()
        };

        let status = self
            .shell()
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| BuildError::Launch {
                command: self.command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(BuildError::Failed {
                command: self.command.clone(),
                status,
            });
        }

        existing(&self.artifact)
    }
}
