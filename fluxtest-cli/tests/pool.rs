//! End-to-end pool tests.
//!
//! This binary is its own test artifact: launched by the supervisor with
//! `FLUXTEST_ENDPOINT` set it behaves as a worker, otherwise it runs the
//! scenarios below against itself. `FLUXTEST_FIXTURE_MODE` swaps the real
//! worker loop for one that misbehaves on purpose.

use fluxtest_cli::{RunRequest, Silent, Supervisor, SupervisorError, derive_seed};
use fluxtest_core::{TestContext, registered_tests, run_test};
use fluxtest_ipc::{
    ENDPOINT_ENV, Endpoint, EndpointAllocator, FrameReader, FrameWriter, PROTOCOL_VERSION,
    SupervisorCommand, WorkerHello, WorkerMessage,
};
use fluxtest_report::{ReportFormat, RunReport, RunStatus};
use regex::Regex;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

const CRASH_ENV: &str = "FLUXTEST_FIXTURE_CRASH";
const MODE_ENV: &str = "FLUXTEST_FIXTURE_MODE";

fn adds(_ctx: &mut TestContext) {
    assert_eq!(2 + 2, 4);
}

fn compares(ctx: &mut TestContext) {
    if "a" >= "b" {
        ctx.fail("strings out of order");
    }
}

fn fails(ctx: &mut TestContext) {
    ctx.fail("Expected true, got false");
}

fn randomized(ctx: &mut TestContext) {
    use rand::Rng;
    let mut rng = ctx.rng();
    for _ in 0..ctx.fuzz_iterations() {
        let n: u32 = rng.r#gen();
        if n.wrapping_add(0) != n {
            ctx.fail(format!("identity failed for {n}"));
        }
    }
}

fn crashes(_ctx: &mut TestContext) {
    if std::env::var_os(CRASH_ENV).is_some() {
        std::process::exit(101);
    }
}

fn bulk(_ctx: &mut TestContext) {}

fn sleeps(_ctx: &mut TestContext) {
    std::thread::sleep(Duration::from_secs(30));
}

fluxtest_core::register!("fixture::adds", adds);
fluxtest_core::register!("fixture::compares", compares);
fluxtest_core::register!("fixture::fails", fails);
fluxtest_core::register!("fixture::randomized", randomized);
fluxtest_core::register!("crash::adds", adds);
fluxtest_core::register!("crash::exits", crashes);
fluxtest_core::register!("bulk::t00", bulk);
fluxtest_core::register!("bulk::t01", bulk);
fluxtest_core::register!("bulk::t02", bulk);
fluxtest_core::register!("bulk::t03", bulk);
fluxtest_core::register!("bulk::t04", bulk);
fluxtest_core::register!("bulk::t05", bulk);
fluxtest_core::register!("bulk::t06", bulk);
fluxtest_core::register!("bulk::t07", bulk);
fluxtest_core::register!("bulk::t08", bulk);
fluxtest_core::register!("bulk::t09", bulk);
fluxtest_core::register!("slow::sleeps", sleeps);

/// Worker loop that speaks the protocol with one deliberate defect:
/// `garbage` slips an undecodable frame in before the second report and
/// `old-protocol` announces a version the supervisor does not speak.
fn scripted_worker(mode: &str) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = Endpoint::from_env().ok_or("no endpoint in environment")?;
    let stream = endpoint.connect()?;
    let mut raw = stream.try_clone()?;
    let mut reader = FrameReader::new(stream.try_clone()?);
    let mut writer = FrameWriter::new(stream);

    let ids = registered_tests().iter().map(|t| t.id.to_string()).collect();
    let mut hello = WorkerHello::new(std::process::id(), ids);
    if mode == "old-protocol" {
        hello.protocol_version = PROTOCOL_VERSION + 1;
    }
    writer.write(&WorkerMessage::Ready(hello))?;

    let SupervisorCommand::Run {
        assignments,
        fuzz_iterations,
    } = reader.read()?
    else {
        return Ok(());
    };
    for (n, assignment) in assignments.iter().enumerate() {
        if n == 1 && mode == "garbage" {
            raw.write_all(&8u32.to_le_bytes())?;
            raw.write_all(&[0xff; 8])?;
            raw.flush()?;
        }
        let def = registered_tests()
            .into_iter()
            .find(|t| t.id == assignment.test_id)
            .ok_or("assigned test is not registered")?;
        let report = run_test(def, assignment.seed, fuzz_iterations);
        writer.write(&WorkerMessage::TestFinished(report))?;
    }
    writer.write(&WorkerMessage::Finished {
        reported: assignments.len() as u32,
    })?;
    Ok(())
}

type Outcome = Result<(), String>;

macro_rules! ensure {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err(format!($($msg)+));
        }
    };
}

fn request(filter: &str, workers: usize) -> RunRequest {
    let mut request = RunRequest::new(std::env::current_exe().expect("current exe"));
    request.worker_count = workers;
    request.base_seed = Some(1234);
    request.fuzz_iterations = 20;
    request.report_format = ReportFormat::Json;
    request.filter = Some(Regex::new(filter).expect("valid filter"));
    request
}

async fn run(socket_dir: &Path, request: &RunRequest) -> Result<RunReport, String> {
    let mut supervisor = Supervisor::with_allocator(EndpointAllocator::with_dir(socket_dir));
    supervisor
        .run(request, &mut Silent)
        .await
        .map_err(|e| format!("supervisor error: {e}"))
}

async fn mixed_results_are_reported(dir: &Path) -> Outcome {
    let request = request("^fixture::(adds|compares|fails)$", 2);
    let report = run(dir, &request).await?;
    let summary = &report.summary;

    ensure!(summary.total_tests == 3, "total_tests = {}", summary.total_tests);
    ensure!(summary.passed == 2, "passed = {}", summary.passed);
    ensure!(summary.failed == 1, "failed = {}", summary.failed);
    ensure!(
        summary.runner_errors.is_empty(),
        "runner errors: {:?}",
        summary.runner_errors
    );
    ensure!(summary.exit_code() == 1, "exit code {}", summary.exit_code());
    ensure!(report.status == RunStatus::Failed, "status {:?}", report.status);

    let failed = report
        .tests
        .iter()
        .find(|t| t.test_id == "fixture::fails")
        .ok_or("fixture::fails missing from report")?;
    ensure!(
        failed.failure_messages == ["Expected true, got false"],
        "messages {:?}",
        failed.failure_messages
    );

    let console = ReportFormat::Console.render(&report);
    let last = console.lines().last().unwrap_or_default();
    ensure!(
        last.starts_with("2 passed, 1 failed, 0 skipped, 0 todo in "),
        "console summary line: {last}"
    );

    let junit = ReportFormat::Junit.render(&report);
    ensure!(
        junit.matches("<failure ").count() == 1,
        "expected one <failure> element:\n{junit}"
    );
    ensure!(
        junit.contains("failures=\"1\""),
        "missing failure count:\n{junit}"
    );
    Ok(())
}

async fn crashed_worker_is_accounted(dir: &Path) -> Outcome {
    let mut request = request("^crash::", 1);
    request.env.insert(CRASH_ENV.to_string(), "1".to_string());
    let report = run(dir, &request).await?;
    let summary = &report.summary;

    ensure!(summary.passed == 1, "passed = {}", summary.passed);
    ensure!(
        summary.runner_errors.len() == 1,
        "runner errors: {:?}",
        summary.runner_errors
    );
    ensure!(
        summary.runner_errors[0].contains("crash::exits"),
        "unreported test not named: {}",
        summary.runner_errors[0]
    );
    ensure!(summary.exit_code() == 1, "exit code {}", summary.exit_code());
    ensure!(
        report.status == RunStatus::Incomplete,
        "status {:?}",
        report.status
    );
    Ok(())
}

async fn same_seed_same_assignments(dir: &Path) -> Outcome {
    let first = run(dir, &request("^fixture::", 3)).await?;
    let second = run(dir, &request("^fixture::", 2)).await?;

    let seeds = |report: &RunReport| {
        report
            .tests
            .iter()
            .map(|t| (t.test_id.clone(), t.seed_used))
            .collect::<Vec<_>>()
    };
    ensure!(
        seeds(&first) == seeds(&second),
        "seeds differ: {:?} vs {:?}",
        seeds(&first),
        seeds(&second)
    );
    for test in &first.tests {
        ensure!(
            test.seed_used == derive_seed(1234, 20, &test.test_id),
            "unexpected seed for {}",
            test.test_id
        );
    }
    ensure!(first.summary.seed == 1234, "seed {}", first.summary.seed);
    Ok(())
}

async fn tests_are_partitioned_across_workers(dir: &Path) -> Outcome {
    let report = run(dir, &request("^bulk::", 4)).await?;
    ensure!(report.summary.passed == 10, "passed = {}", report.summary.passed);

    let mut per_worker = [0usize; 4];
    for test in &report.tests {
        ensure!(test.worker < 4, "worker index {}", test.worker);
        per_worker[test.worker] += 1;
    }
    let mut sizes = per_worker.to_vec();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    ensure!(sizes == [3, 3, 2, 2], "shard sizes {per_worker:?}");
    Ok(())
}

async fn wrapped_artifact_connects(dir: &Path) -> Outcome {
    let exe = std::env::current_exe().map_err(|e| e.to_string())?;
    // No `exec`: the worker connects from a child of the spawned shell
    let wrapper = dir.join("wrapped-artifact.sh");
    let script = format!("#!/bin/sh\n'{}'\nexit $?\n", exe.display());
    std::fs::write(&wrapper, script).map_err(|e| e.to_string())?;
    std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| e.to_string())?;

    let mut request = request("^fixture::(adds|compares)$", 2);
    request.artifact = wrapper;
    let report = run(dir, &request).await?;
    let summary = &report.summary;

    ensure!(summary.passed == 2, "passed = {}", summary.passed);
    ensure!(
        summary.runner_errors.is_empty(),
        "runner errors: {:?}",
        summary.runner_errors
    );
    ensure!(summary.exit_code() == 0, "exit code {}", summary.exit_code());
    Ok(())
}

async fn malformed_report_is_dropped(dir: &Path) -> Outcome {
    let mut request = request("^fixture::(adds|compares)$", 1);
    request.env.insert(MODE_ENV.to_string(), "garbage".to_string());
    let report = run(dir, &request).await?;
    let summary = &report.summary;

    ensure!(summary.total_tests == 2, "total_tests = {}", summary.total_tests);
    ensure!(summary.passed == 2, "passed = {}", summary.passed);
    ensure!(
        summary.runner_errors.len() == 1,
        "runner errors: {:?}",
        summary.runner_errors
    );
    ensure!(
        summary.runner_errors[0].contains("malformed report"),
        "malformed frame not named: {}",
        summary.runner_errors[0]
    );
    Ok(())
}

async fn protocol_mismatch_crashes_worker(dir: &Path) -> Outcome {
    let mut request = request("^fixture::adds$", 1);
    request
        .env
        .insert(MODE_ENV.to_string(), "old-protocol".to_string());
    let mut supervisor = Supervisor::with_allocator(EndpointAllocator::with_dir(dir));

    match supervisor.run(&request, &mut Silent).await {
        Err(SupervisorError::WorkerCrashed(reason)) => {
            ensure!(
                reason.contains(&format!(
                    "speaks protocol version {} (expected {PROTOCOL_VERSION})",
                    PROTOCOL_VERSION + 1
                )),
                "crash reason: {reason}"
            );
            Ok(())
        }
        other => Err(format!("expected WorkerCrashed, got {other:?}")),
    }
}

async fn run_timeout_stops_the_pool(dir: &Path) -> Outcome {
    let mut request = request("^slow::", 1);
    request.run_timeout = Some(Duration::from_millis(300));
    let mut supervisor = Supervisor::with_allocator(EndpointAllocator::with_dir(dir));

    let started = std::time::Instant::now();
    let result = supervisor.run(&request, &mut Silent).await;
    let elapsed = started.elapsed();

    ensure!(
        matches!(result, Err(SupervisorError::IpcTimeout(_))),
        "expected IpcTimeout, got {result:?}"
    );
    ensure!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
    Ok(())
}

async fn scenarios(dir: &Path) -> Vec<(&'static str, Outcome)> {
    vec![
        (
            "mixed_results_are_reported",
            mixed_results_are_reported(dir).await,
        ),
        (
            "crashed_worker_is_accounted",
            crashed_worker_is_accounted(dir).await,
        ),
        (
            "same_seed_same_assignments",
            same_seed_same_assignments(dir).await,
        ),
        (
            "tests_are_partitioned_across_workers",
            tests_are_partitioned_across_workers(dir).await,
        ),
        (
            "wrapped_artifact_connects",
            wrapped_artifact_connects(dir).await,
        ),
        (
            "malformed_report_is_dropped",
            malformed_report_is_dropped(dir).await,
        ),
        (
            "protocol_mismatch_crashes_worker",
            protocol_mismatch_crashes_worker(dir).await,
        ),
        (
            "run_timeout_stops_the_pool",
            run_timeout_stops_the_pool(dir).await,
        ),
    ]
}

fn main() -> ExitCode {
    if std::env::var_os(ENDPOINT_ENV).is_some() {
        return match std::env::var(MODE_ENV) {
            Ok(mode) => match scripted_worker(&mode) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("scripted worker ({mode}): {e}");
                    ExitCode::FAILURE
                }
            },
            Err(_) => fluxtest_core::artifact_main(),
        };
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let results = runtime.block_on(scenarios(dir.path()));

    let mut failed = 0;
    for (name, outcome) in &results {
        match outcome {
            Ok(()) => println!("test {name} ... ok"),
            Err(reason) => {
                failed += 1;
                println!("test {name} ... FAILED\n    {reason}");
            }
        }
    }
    println!(
        "\ntest result: {}. {} passed; {} failed",
        if failed == 0 { "ok" } else { "FAILED" },
        results.len() - failed,
        failed
    );

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
