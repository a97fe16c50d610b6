use env_logger::{Builder, WriteStyle};
use hostcheck::config::AppConfig;
use log::error;
use std::process::ExitCode;

const USAGE: &str = "Usage: hostcheck <hostname> [ipaddress]";

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(hostname) = args.next() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(3);
    };
    let ipaddress = args.next();

    // Load configuration first (without logging)
    let config_path =
        std::env::var("HOSTCHECK_CONFIG").unwrap_or_else(|_| "hostcheck.toml".to_string());
    let config = AppConfig::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        // Fall back to default configuration
        AppConfig::default()
    });

    // Initialise logger with a configured log level
    Builder::new()
        .filter_level(config.get_log_level())
        .write_style(WriteStyle::Always)
        .format_timestamp_secs()
        .init();

    match hostcheck::run(&config, &hostname, ipaddress.as_deref()).await {
        Ok(summary) => {
            println!("{} - {}", summary.state, summary.output);
            ExitCode::from(summary.state.code() as u8)
        }
        Err(e) => {
            error!("Application error: {}", e);
            println!("UNKNOWN - {:#}", e);
            ExitCode::from(3)
        }
    }
}
