use std::process::ExitCode;

fn main() -> ExitCode {
    match fluxtest_cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
