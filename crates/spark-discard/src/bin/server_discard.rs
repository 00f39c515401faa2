//! `server_discard`：在 8080 端口接受一个 TCP Flow 并丢弃其全部数据。

use std::{io, process::ExitCode};

use spark_discard::{ServerConfig, ServerError, logging, serve};
use spark_flow_tcp::TcpContext;
use tracing::error;

fn main() -> ExitCode {
    let config = match ServerConfig::try_parse_from(std::env::args_os()) {
        Ok(config) => config,
        Err(config_error) => {
            if config_error.is_informational() {
                println!("{config_error}");
                return ExitCode::SUCCESS;
            }
            eprintln!("{config_error}");
            println!("{}", ServerConfig::usage());
            return ExitCode::from(ServerError::from(config_error).exit_code());
        }
    };

    if let Err(logging_error) = logging::install(config.verbosity()) {
        eprintln!("{logging_error}");
    }
    config.log_options();

    match serve(&config, TcpContext::new, || -> Box<dyn io::Write> { Box::new(io::stdout()) }) {
        Ok(_) => ExitCode::SUCCESS,
        Err(server_error) => {
            error!(error = %server_error, "server_discard failed");
            ExitCode::from(server_error.exit_code())
        }
    }
}
