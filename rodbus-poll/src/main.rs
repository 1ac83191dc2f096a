//! Command-line Modbus polling client

use std::process::ExitCode;

use rodbus_poll::ConfigError;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match rodbus_poll::cli::parse(std::env::args_os().skip(1)) {
        Ok(config) => config,
        Err(err) if err.is_informational() => {
            if let ConfigError::Usage(err) = err {
                let _ = err.print();
            }
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("rodbus-poll: {err}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(log_level(config.verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match rodbus_poll::run(&config, std::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rodbus-poll: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Without `-v` only errors are logged, so a failed run ends with the single `rodbus-poll:` line
fn log_level(verbose: bool) -> tracing::Level {
    if verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::ERROR
    }
}
