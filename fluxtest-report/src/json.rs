//! JSON Output

use crate::report::RunReport;

/// Generate a prettified JSON report.
///
/// The document always carries the full field set, including an empty
/// `tests` array and empty `runner_errors` for a zero-test run.
pub fn generate_json_report(report: &RunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| {
        serde_json::json!({ "runner_errors": [format!("failed to serialize report: {e}")] })
            .to_string()
    }) + "\n"
}
