//! JUnit XML Output
//!
//! One `<testsuite>` per module, one `<testcase>` per test event. Runner
//! errors become `<error>` cases of a dedicated `fluxtest.runner` suite so a
//! crashed run still yields a single well-formed document.

use crate::report::{Outcome, RunReport, TestEvent};
use std::collections::BTreeMap;
use std::fmt::Write;

const RUNNER_SUITE: &str = "fluxtest.runner";

/// Escape text for use in XML content and attribute values.
///
/// Characters that XML 1.0 cannot represent (most C0 controls, including the
/// ESC of terminal color codes) are dropped.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\t' | '\n' | '\r' => escaped.push(c),
            c if (c as u32) < 0x20 => {}
            c => escaped.push(c),
        }
    }
    escaped
}

fn seconds(ms: f64) -> String {
    format!("{:.3}", ms / 1000.0)
}

fn write_properties(xml: &mut String, report: &RunReport) {
    let _ = writeln!(xml, "    <properties>");
    let _ = writeln!(
        xml,
        "      <property name=\"seed\" value=\"{}\"/>",
        report.summary.seed
    );
    let _ = writeln!(
        xml,
        "      <property name=\"fuzz\" value=\"{}\"/>",
        report.summary.fuzz_iterations
    );
    let _ = writeln!(xml, "    </properties>");
}

fn write_testcase(xml: &mut String, event: &TestEvent) {
    let classname = escape_xml(event.module());
    let name = escape_xml(event.name());
    let time = seconds(event.duration_ms);

    match event.outcome {
        Outcome::Pass => {
            let _ = writeln!(
                xml,
                "    <testcase classname=\"{classname}\" name=\"{name}\" time=\"{time}\"/>"
            );
        }
        Outcome::Fail => {
            let first = event
                .failure_messages
                .first()
                .map(String::as_str)
                .unwrap_or("failed");
            let _ = writeln!(
                xml,
                "    <testcase classname=\"{classname}\" name=\"{name}\" time=\"{time}\">"
            );
            let _ = writeln!(
                xml,
                "      <failure message=\"{}\" type=\"failure\">{}</failure>",
                escape_xml(first),
                escape_xml(&event.failure_messages.join("\n"))
            );
            let _ = writeln!(xml, "    </testcase>");
        }
        Outcome::Skip | Outcome::Todo => {
            let message = if event.outcome == Outcome::Todo {
                "todo"
            } else {
                "skipped"
            };
            let _ = writeln!(
                xml,
                "    <testcase classname=\"{classname}\" name=\"{name}\" time=\"{time}\">"
            );
            let _ = writeln!(xml, "      <skipped message=\"{message}\"/>");
            let _ = writeln!(xml, "    </testcase>");
        }
    }
}

/// Generate a single JUnit XML document for the run
pub fn generate_junit_report(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut modules: BTreeMap<&str, Vec<&TestEvent>> = BTreeMap::new();
    for event in &report.tests {
        modules.entry(event.module()).or_default().push(event);
    }

    let mut xml = String::new();
    let _ = writeln!(xml, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let _ = writeln!(
        xml,
        "<testsuites name=\"fluxtest\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{}\">",
        report.tests.len() + summary.runner_errors.len(),
        summary.failed,
        summary.runner_errors.len(),
        summary.skipped + summary.todos,
        seconds(summary.duration_ms)
    );

    for (module, events) in &modules {
        let failures = events.iter().filter(|e| e.outcome == Outcome::Fail).count();
        let skipped = events
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Skip | Outcome::Todo))
            .count();
        let time: f64 = events.iter().map(|e| e.duration_ms).sum();

        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\" time=\"{}\">",
            escape_xml(module),
            events.len(),
            failures,
            skipped,
            seconds(time)
        );
        write_properties(&mut xml, report);
        for event in events {
            write_testcase(&mut xml, event);
        }
        let _ = writeln!(xml, "  </testsuite>");
    }

    if !summary.runner_errors.is_empty() {
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{RUNNER_SUITE}\" tests=\"{0}\" failures=\"0\" errors=\"{0}\" skipped=\"0\" time=\"0.000\">",
            summary.runner_errors.len()
        );
        write_properties(&mut xml, report);
        for (index, error) in summary.runner_errors.iter().enumerate() {
            let _ = writeln!(
                xml,
                "    <testcase classname=\"{RUNNER_SUITE}\" name=\"runner error {}\" time=\"0.000\">",
                index + 1
            );
            let _ = writeln!(
                xml,
                "      <error message=\"{0}\" type=\"runner\">{0}</error>",
                escape_xml(error)
            );
            let _ = writeln!(xml, "    </testcase>");
        }
        let _ = writeln!(xml, "  </testsuite>");
    }

    let _ = writeln!(xml, "</testsuites>");
    xml
}
