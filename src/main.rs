//! depload - dependency-ordered module loading from the command line

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = depload::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
