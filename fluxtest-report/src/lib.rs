#![warn(missing_docs)]
//! FluxTest Report - Run Summaries and Renderers
//!
//! Renders a finished run in one of three formats:
//! - Console (colorized, with live per-test lines while the run is in flight)
//! - JSON (one machine-readable document)
//! - JUnit XML (one document for CI systems)

mod console;
mod json;
mod junit;
mod report;

pub use console::{format_console_report, format_live_event};
pub use json::generate_json_report;
pub use junit::{escape_xml, generate_junit_report};
pub use report::{Outcome, ReportMeta, RunReport, RunStatus, RunSummary, TestEvent};

/// Report format, selected once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Incremental, colorized terminal output
    #[default]
    Console,
    /// One JSON document
    Json,
    /// One JUnit XML document
    Junit,
}

impl ReportFormat {
    /// JSON and JUnit consumers must only ever see one complete document
    pub fn is_machine_readable(self) -> bool {
        matches!(self, ReportFormat::Json | ReportFormat::Junit)
    }

    /// Render the final report
    pub fn render(self, report: &RunReport) -> String {
        match self {
            ReportFormat::Console => format_console_report(report),
            ReportFormat::Json => generate_json_report(report),
            ReportFormat::Junit => generate_junit_report(report),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" => Ok(ReportFormat::Console),
            "json" => Ok(ReportFormat::Json),
            "junit" => Ok(ReportFormat::Junit),
            other => Err(format!(
                "Unknown report format: {} (expected console, json, or junit)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReportFormat::Console => "console",
            ReportFormat::Json => "json",
            ReportFormat::Junit => "junit",
        })
    }
}
