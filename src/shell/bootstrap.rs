//! Brings the far-end DOS shell to a known-ready state at process startup.

use std::time::Duration;

use tracing::info;

use super::PROMPT_TAIL;
use crate::serial::SerialChannel;

const CTRL_B: u8 = 0x02;
const ATTEMPT_SLEEP: Duration = Duration::from_millis(500);
const ATTEMPT_READ_TIMEOUT: Duration = Duration::from_millis(100);
const SETTLE_SLEEP: Duration = Duration::from_millis(100);

/// Send Ctrl-B (bypass autoexec) followed by EOL, repeating until the shell
/// answers with its prompt, then give it one more EOL round-trip to settle.
///
/// No external scheduler handle is needed here — everything runs on the
/// channel's own background task via `tokio::time`.
pub async fn bring_up(channel: &SerialChannel) {
    loop {
        let _ = channel.write(&[CTRL_B]);
        tokio::time::sleep(ATTEMPT_SLEEP).await;
        let _ = channel.write(b"\r");
        if channel
            .read_until(PROMPT_TAIL, Some(ATTEMPT_READ_TIMEOUT))
            .await
            .is_some()
        {
            break;
        }
    }

    tokio::time::sleep(SETTLE_SLEEP).await;
    let _ = channel.write(b"\r");
    tokio::time::sleep(SETTLE_SLEEP).await;
    channel.read_until(PROMPT_TAIL, None).await;

    info!("DOS shell bootstrap complete");
}
