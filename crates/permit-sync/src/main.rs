use permit_sync::{
    config::load_config,
    logging::{init_logging, LogLevel},
    server::serve,
};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config_error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let (logger, _log_guard) = init_logging(config.log_level, &config.log_dir);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match serve(&config, logger.clone(), shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.emit(LogLevel::Error, || {
                error!(event = "server_error", error = %err)
            });
            ExitCode::FAILURE
        }
    }
}
