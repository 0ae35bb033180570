use reactor_httpd::logger::{self, LoggerConfig};
use reactor_httpd::{Server, ServerConfig};

fn main() -> std::process::ExitCode {
    let config = ServerConfig::builder().build().with_env_overrides();

    if config.open_log {
        let logger_config = LoggerConfig {
            level: config.log_level,
            dir: config.log_dir.clone(),
            suffix: ".log".to_string(),
            queue_capacity: config.log_queue_size,
        };
        if let Err(e) = logger::init(logger_config) {
            eprintln!("============== Server Init Error ==============");
            eprintln!("failed to initialise logger: {e}");
            return std::process::ExitCode::FAILURE;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("starting up");

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            if logger::is_initialized() {
                reactor_httpd::log_error!("============== Server Init Error ==============");
                reactor_httpd::log_error!("{e}");
            }
            tracing::error!(error = %e, "server init failed");
            eprintln!("server init failed: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.start() {
        reactor_httpd::log_error!("reactor loop terminated: {e}");
        tracing::error!(error = %e, "reactor loop terminated");
        eprintln!("reactor loop terminated: {e}");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
