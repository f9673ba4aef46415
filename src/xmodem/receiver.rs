//! Download path: drive the device through SOH/STX blocks, deliver bytes
//! upward truncated to the declared file size.

use std::sync::Arc;

use tracing::debug;

use super::{checksum, ACK, EOT, NAK, SOH, STX};
use crate::serial::SerialChannel;

/// Drives an XMODEM receive (device → server), used for FTP downloads.
///
/// The sequence byte pair following the mode byte is read but never
/// validated — out-of-order or repeated frames are accepted rather than
/// rejected.
pub struct XmodemReceiver {
    channel: Arc<SerialChannel>,
    remaining: u64,
}

impl XmodemReceiver {
    /// Send the initiating `NAK` and start tracking the remaining-byte
    /// budget from the file's declared size.
    pub async fn start(channel: Arc<SerialChannel>, file_size: u64) -> XmodemReceiver {
        let _ = channel.write(&[NAK]);
        XmodemReceiver {
            channel,
            remaining: file_size,
        }
    }

    /// Read and deliver the next block, truncated to the remaining byte
    /// budget. Returns an empty `Vec` once `EOT` is seen — callers treat
    /// that as end-of-file.
    pub async fn read(&mut self) -> Vec<u8> {
        loop {
            let mode = match self.channel.read_exact(1, None).await {
                Some(b) => b[0],
                None => return Vec::new(),
            };

            // Sequence + complement: consumed, not validated (see struct docs).
            if self.channel.read_exact(2, None).await.is_none() {
                return Vec::new();
            }

            if mode == EOT {
                let _ = self.channel.write(&[ACK]);
                return Vec::new();
            }

            let block_len = match mode {
                m if m == SOH => 128,
                m if m == STX => 1024,
                _ => continue, // unrecognized mode byte: keep listening
            };

            let data = match self.channel.read_exact(block_len, None).await {
                Some(d) => d,
                None => return Vec::new(),
            };
            let csum = match self.channel.read_exact(1, None).await {
                Some(c) => c[0],
                None => return Vec::new(),
            };

            if csum == checksum(&data) {
                let _ = self.channel.write(&[ACK]);
                let take = self.remaining.min(data.len() as u64) as usize;
                self.remaining -= take as u64;
                debug!("xmodem recv: block ok, delivering {take} bytes");
                return data[..take].to_vec();
            }

            debug!("xmodem recv: checksum mismatch, NAK and reread");
            let _ = self.channel.write(&[NAK]);
        }
    }
}
