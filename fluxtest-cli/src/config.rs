//! Configuration loading from fluxtest.toml
//!
//! The configuration file is discovered by walking up from the current
//! directory. Every value can be overridden from the command line.

use fluxtest_report::ReportFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up by [`FluxTestConfig::discover`]
pub const CONFIG_FILE: &str = "fluxtest.toml";

/// FluxTest configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FluxTestConfig {
    /// Worker pool configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// How to obtain the test artifact
    #[serde(default)]
    pub build: BuildConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
    /// Watch mode configuration
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of worker processes (defaults to the number of logical cores)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Iteration count handed to randomized tests
    #[serde(default = "default_fuzz")]
    pub fuzz: u32,
    /// Fixed base seed; a random one is drawn per run when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Grace period for a spawned worker to connect (e.g. "10s")
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// Upper bound on a whole run; unset means unbounded
    #[serde(default)]
    pub run_timeout: Option<String>,
    /// Only run tests whose id matches this regex
    #[serde(default)]
    pub filter: Option<String>,
    /// Extra environment variables for every worker
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            fuzz: default_fuzz(),
            seed: None,
            connect_timeout: default_connect_timeout(),
            run_timeout: None,
            filter: None,
            env: BTreeMap::new(),
        }
    }
}

fn default_fuzz() -> u32 {
    100
}
fn default_connect_timeout() -> String {
    "10s".to_string()
}

/// Artifact build configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildConfig {
    /// Shell command producing the artifact (e.g. "cargo build --tests")
    #[serde(default)]
    pub command: Option<String>,
    /// Path of the runnable test artifact
    #[serde(default)]
    pub artifact: Option<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Default report format: console, json, or junit
    #[serde(default)]
    pub report: ReportFormat,
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Files and directories to watch, relative to the config file
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<PathBuf>,
    /// Stability window for change events (e.g. "500ms")
    #[serde(default = "default_debounce")]
    pub debounce: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: default_watch_paths(),
            debounce: default_debounce(),
        }
    }
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("src"), PathBuf::from("tests")]
}
fn default_debounce() -> String {
    "500ms".to_string()
}

impl FluxTestConfig {
    /// Load configuration from a TOML file.
    ///
    /// Relative watch paths and the artifact path are resolved against the
    /// directory holding the file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        for path in &mut self.watch.paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if let Some(artifact) = self.build.artifact.as_mut().filter(|a| a.is_relative()) {
            *artifact = base.join(&*artifact);
        }
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let dir = std::env::current_dir().ok()?;
        Self::discover_from(&dir)
    }

    /// Walk up from `start` looking for [`CONFIG_FILE`].
    ///
    /// A file that exists but fails to parse is logged and ignored.
    pub fn discover_from(start: &Path) -> Option<Self> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => {
                        tracing::debug!(path = %config_path.display(), "loaded configuration");
                        Some(config)
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %config_path.display(),
                            "ignoring invalid configuration: {e}"
                        );
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# FluxTest Configuration

[runner]
# Number of worker processes (defaults to logical cores)
# workers = 4
# Iterations handed to randomized tests
fuzz = 100
# Fixed base seed (uncomment to make every run reproducible)
# seed = 1234
# How long a spawned worker may take to connect
connect_timeout = "10s"
# Upper bound on a whole run (uncomment to enable)
# run_timeout = "10m"
# Only run tests whose id matches this regex (uncomment to enable)
# filter = "^parser::"

[runner.env]
# Extra environment variables for every worker
# RUST_BACKTRACE = "1"

[build]
# Command producing the test artifact (uncomment to enable)
# command = "cargo build --tests"
# Path of the runnable test artifact
# artifact = "target/debug/my-tests"

[output]
# Report format: console, json, or junit
report = "console"

[watch]
# Files and directories that trigger a rerun
paths = ["src", "tests"]
# Stability window before a change triggers a rerun
debounce = "500ms"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration number: {}", num_part));
        }

        let nanos_per_unit: f64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" | "min" => 60_000_000_000.0,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * nanos_per_unit) as u64))
    }
}
