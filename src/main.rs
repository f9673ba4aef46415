#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # comftp
//!
//! Exposes a legacy DOS machine — reachable only over an RS-232 serial
//! line — as an anonymous FTP server. FTP commands are translated into a
//! driven DOS shell session plus XMODEM transfers over the single shared
//! serial link.
//!
//! ## Subcommands
//!
//! - (default) — run the FTP server
//! - `comftp list-coms` — enumerate available serial ports and exit

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use libunftp::ServerBuilder;
use tracing::{error, info};

use comftp::config::Commands;
use comftp::pathio::Templates;
use comftp::serial::SerialChannel;
use comftp::{shell, AppState, Cli, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::ListComs)) {
        for name in comftp::serial::list_port_names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }

    init_tracing(cli.quiet);

    let config = match Config::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    run_server(config).await
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        "opening serial port {} at {} baud",
        config.serial_port, config.serial_speed
    );
    let channel = match SerialChannel::open(&config.serial_port, config.serial_speed) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("failed to open serial port: {e}");
            return ExitCode::FAILURE;
        }
    };

    shell::bootstrap::bring_up(&channel).await;

    let templates = Templates {
        send: config.ftrans_send.clone(),
        size: config.ftrans_size.clone(),
        receive: config.ftrans_receive.clone(),
    };
    let state = AppState::new(channel, templates);

    let addr = format!("{}:{}", config.host, config.port);
    let builder: ServerBuilder<_, libunftp::auth::DefaultUser> =
        ServerBuilder::new(Box::new(move || state.new_backend()));

    let server = match builder.build() {
        Ok(s) => s,
        Err(e) => {
            error!("failed to build FTP server: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("serving anonymous FTP on {addr}");
    tokio::select! {
        result = server.listen(addr) => {
            if let Err(e) = result {
                error!("FTP server stopped: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
    }

    ExitCode::SUCCESS
}
