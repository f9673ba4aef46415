//! Upload path: buffer bytes from `STOR`, flush full 128-byte SOH blocks.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{checksum, ACK, EOT, ETB, SOH};
use crate::serial::SerialChannel;

const BLOCK_SIZE: usize = 128;
const PAD_BYTE: u8 = b'0';

/// Drives an XMODEM send (server → device), used for FTP uploads.
///
/// Sequence numbering starts at 1 for every open and wraps modulo 256. Each
/// frame is retried indefinitely until acknowledged — the serial link has no
/// notion of a permanently failed transfer short of the cable being
/// disconnected, in which case the retry simply never completes.
pub struct XmodemSender {
    channel: Arc<SerialChannel>,
    buffer: Vec<u8>,
    seq: u8,
}

impl XmodemSender {
    pub fn new(channel: Arc<SerialChannel>) -> Self {
        Self {
            channel,
            buffer: Vec::new(),
            seq: 1,
        }
    }

    /// Buffer `data`, flushing every complete 128-byte block to the wire.
    pub async fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= BLOCK_SIZE {
            let block: Vec<u8> = self.buffer.drain(..BLOCK_SIZE).collect();
            self.send_block(&block).await;
        }
    }

    /// Pad the trailing partial block with `'0'` bytes, transmit it, then
    /// `EOT` / await `ACK` / `ETB` to end the transfer. Always sends exactly
    /// one final block, even when the payload was an exact multiple of 128
    /// bytes.
    pub async fn close(mut self) {
        let mut block = std::mem::take(&mut self.buffer);
        block.resize(BLOCK_SIZE, PAD_BYTE);
        self.send_block(&block).await;

        let _ = self.channel.write(&[EOT]);
        match self.channel.read_exact(1, None).await {
            Some(b) if b[0] == ACK => {}
            Some(other) => warn!("xmodem send: expected ACK after EOT, got {:?}", other),
            None => warn!("xmodem send: serial channel closed awaiting ACK after EOT"),
        }
        let _ = self.channel.write(&[ETB]);
    }

    async fn send_block(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), BLOCK_SIZE);
        let csum = checksum(data);
        loop {
            let mut frame = Vec::with_capacity(3 + BLOCK_SIZE + 1);
            frame.push(SOH);
            frame.push(self.seq);
            frame.push(0xFF - self.seq);
            frame.extend_from_slice(data);
            frame.push(csum);
            if self.channel.write(&frame).is_err() {
                warn!("xmodem send: serial channel closed mid-frame");
                return;
            }

            match self.channel.read_exact(1, None).await {
                Some(b) if b[0] == ACK => {
                    debug!("xmodem send: block seq={} acked", self.seq);
                    self.seq = self.seq.wrapping_add(1);
                    return;
                }
                Some(_) => continue, // NAK or garbage — resend identical frame
                None => return,      // channel gone, nothing left to retry
            }
        }
    }
}
