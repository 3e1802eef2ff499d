use std::process::ExitCode;

fn main() -> ExitCode {
    autoquery_cli::run()
}
