use std::process::ExitCode;

fn main() -> ExitCode {
    nurture_cli::run()
}
