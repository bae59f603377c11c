use convd_core::{config, logging};

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    let cfg = match config::load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("convd error: loading config: {:#}", err);
            std::process::exit(1);
        }
    };

    let log_cfg = cfg.logging();
    if let Err(err) = logging::init_logging(&log_cfg) {
        eprintln!("convd: file logging unavailable ({err:#}); logging to stderr");
        logging::init_logging_stderr(&log_cfg);
    }

    if let Err(err) = CliCommand::run_from_args(cfg).await {
        eprintln!("convd error: {:#}", err);
        std::process::exit(1);
    }
}
