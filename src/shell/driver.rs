//! Per-character command echo verification with backspace-based rollback.
//!
//! The wire echoes characters asynchronously and occasionally drops or
//! doubles them. Per-character verification with erase recovery is the only
//! way to guarantee the shell sees exactly the intended command line.
//! Errors here are never surfaced to callers: every failure mode this module
//! can hit drives a retry of the whole command, so transient serial desync
//! is handled internally and never surfaced.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::serial::SerialChannel;

const ECHO_TIMEOUT: Duration = Duration::from_millis(250);
const DESYNC_TIMEOUT: Duration = Duration::from_millis(100);
const EOL_TIMEOUT: Duration = Duration::from_millis(100);
const BACKSPACE: u8 = 0x08;

/// Drives the DOS shell: types a command, verifies its echo byte-by-byte,
/// and captures output up to a prompt tail.
pub struct ShellDriver {
    channel: Arc<SerialChannel>,
}

impl ShellDriver {
    pub fn new(channel: Arc<SerialChannel>) -> Self {
        Self { channel }
    }

    /// Run `command`, retrying internally until it is accepted cleanly, and
    /// return the captured bytes between the echoed command line and
    /// `expected_tail` (with the tail itself stripped).
    pub async fn run(&self, command: &[u8], expected_tail: &[u8]) -> Vec<u8> {
        loop {
            if let Some(captured) = self.attempt(command, expected_tail).await {
                return captured;
            }
        }
    }

    async fn attempt(&self, command: &[u8], expected_tail: &[u8]) -> Option<Vec<u8>> {
        if !self.type_and_verify(command).await {
            return None;
        }

        // A stray byte here means the device sent something we didn't ask
        // for (desync) — flush it and start the whole command over.
        if self.channel.read_exact(1, Some(DESYNC_TIMEOUT)).await.is_some() {
            debug!("shell driver: stray byte after echo, flushing and retrying");
            self.channel.drain(Duration::from_millis(0)).await;
            self.erase(command.len() * 2).await;
            return None;
        }

        let _ = self.channel.write(b"\r");
        if self.channel.read_until(b"\n", Some(EOL_TIMEOUT)).await.is_none() {
            debug!("shell driver: no newline echo after EOL, erasing and retrying");
            self.erase(command.len() * 2).await;
            return None;
        }

        self.channel.read_until(expected_tail, None).await
    }

    /// Type `command` one byte at a time, verifying each echo. Returns
    /// `false` (after erasing) on the first mismatch or timeout.
    async fn type_and_verify(&self, command: &[u8]) -> bool {
        for &ch in command {
            if self.channel.write(&[ch]).is_err() {
                return false;
            }
            match self.channel.read_exact(1, Some(ECHO_TIMEOUT)).await {
                Some(echoed) if echoed[0] == ch => continue,
                _ => {
                    debug!("shell driver: echo mismatch/timeout on 0x{ch:02x}, erasing and retrying");
                    self.erase(command.len() * 2).await;
                    return false;
                }
            }
        }
        true
    }

    /// Drain stray input, send `n` backspaces to erase whatever the shell
    /// has buffered so far, then drain again.
    async fn erase(&self, n: usize) {
        self.channel.drain(Duration::from_millis(100)).await;
        let backspaces = vec![BACKSPACE; n];
        let _ = self.channel.write(&backspaces);
        self.channel.drain(Duration::from_millis(100)).await;
    }
}
