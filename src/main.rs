use clap::Parser;
use stockbot::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    init_logging();
    run(Cli::parse())
}

/// Logs go to stderr so decision output on stdout stays clean.
fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stockbot=info"));

    if std::env::var("STOCKBOT_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
