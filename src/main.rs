// Purpose: Provide the binary entry for the keel CLI.
// Inputs/Outputs: Reads process args and returns the dispatcher's exit code.
// Invariants: Main must not bypass centralized CLI argument/diagnostic handling.
// Gotchas: Logging is initialized here once; library code only emits through log macros.

fn main() {
    env_logger::init();
    let code = keel::cli::run_cli(std::env::args().skip(1));
    std::process::exit(code);
}
