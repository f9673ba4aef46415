#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! comftp library — exposes a DOS machine reachable only over a serial line
//! as an anonymous FTP server.
//!
//! - `serial` — the async byte pipe over the blocking UART
//! - `shell` — drives the DOS command interpreter (echo verification,
//!   bootstrap)
//! - `xmodem` — the sender/receiver framing engine for file payloads
//! - `pathio` — the `libunftp` storage backend tying shell + xmodem together
//! - `config` — CLI argument parsing
//! - `state` — process-wide shared state

pub mod config;
pub mod pathio;
pub mod serial;
pub mod shell;
pub mod state;
pub mod xmodem;

pub use config::{Cli, Config};
pub use state::AppState;
