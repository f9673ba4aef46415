//! CLI argument parsing and the resulting runtime configuration.
//!
//! Unlike a daemon with a TOML file on disk, this server has no persisted
//! state and is fully configured from its command line — see the `Cli`
//! struct below for the flag surface and defaults.

use clap::{Parser, Subcommand};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8021
}

fn default_serial_speed() -> u32 {
    115_200
}

fn default_send_template() -> String {
    "f /s {filename}".to_string()
}

fn default_size_template() -> String {
    "{size}".to_string()
}

fn default_receive_template() -> String {
    "f {filename}".to_string()
}

/// Exposes a DOS machine reachable only over RS-232 as an anonymous FTP server.
#[derive(Parser, Debug)]
#[command(name = "comftp", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// FTP control-connection host to bind.
    #[arg(long, default_value_t = default_host())]
    pub host: String,

    /// FTP control-connection port to bind.
    #[arg(long, default_value_t = default_port())]
    pub port: u16,

    /// Serial device path. Defaults to the first port `list-coms` would show.
    #[arg(long)]
    pub serial_port: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = default_serial_speed())]
    pub serial_speed: u32,

    /// Command template for initiating a download (`RETR`). `{filename}` is
    /// substituted with the DOS path.
    #[arg(long, default_value_t = default_send_template())]
    pub ftrans_send: String,

    /// Command fragment appended to the receive template when an `ALLO` size
    /// hint is present. `{size}` is substituted with the hint.
    #[arg(long, default_value_t = default_size_template())]
    pub ftrans_size: String,

    /// Command template for initiating an upload (`STOR`). `{filename}` is
    /// substituted with the DOS path.
    #[arg(long, default_value_t = default_receive_template())]
    pub ftrans_receive: String,

    /// Suppress non-error logging.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available serial ports, one per line, then exit.
    ListComs,
}

/// Runtime configuration derived from [`Cli`], with the serial port resolved
/// to a concrete device path.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub serial_port: String,
    pub serial_speed: u32,
    pub ftrans_send: String,
    pub ftrans_size: String,
    pub ftrans_receive: String,
    pub quiet: bool,
}

impl Config {
    /// Build a `Config` from parsed CLI args, resolving `--serial-port` to
    /// the first enumerated port when omitted.
    ///
    /// Returns `Err` with a human-readable message when no serial port was
    /// given and none could be enumerated.
    pub fn from_cli(cli: &Cli) -> Result<Self, String> {
        let serial_port = match &cli.serial_port {
            Some(p) => p.clone(),
            None => crate::serial::list_port_names()
                .into_iter()
                .next()
                .ok_or_else(|| "no serial ports found; pass --serial-port".to_string())?,
        };

        Ok(Config {
            host: cli.host.clone(),
            port: cli.port,
            serial_port,
            serial_speed: cli.serial_speed,
            ftrans_send: cli.ftrans_send.clone(),
            ftrans_size: cli.ftrans_size.clone(),
            ftrans_receive: cli.ftrans_receive.clone(),
            quiet: cli.quiet,
        })
    }
}
