//! Chunked line reading for subprocess output.
//!
//! Subprocess pipes deliver arbitrary byte chunks. `LineSplitter` turns them
//! into whole lines, carrying a partial trailing line over to the next read,
//! and `forward_chunks` pumps a pipe into a log-stream event channel.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::client::StreamEvent;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const MAX_LINE_BYTES: usize = READ_CHUNK_SIZE * 8;

#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    max_line: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    /// A partial line reaching `max_line` bytes is emitted as a line of its
    /// own instead of waiting for a newline.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Feed raw bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = match self.pending.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => {
                let rest = self.pending.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.pending, rest);
                complete[..complete.len() - 1]
                    .split(|b| *b == b'\n')
                    .map(decode_line)
                    .collect()
            }
            None => Vec::new(),
        };

        if self.pending.len() >= self.max_line {
            let long = std::mem::take(&mut self.pending);
            lines.push(decode_line(&long));
        }
        lines
    }

    /// Whatever partial line is left once the pipe closes.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(line).into_owned()
}

/// Reads `reader` until EOF, sending each batch of complete lines wrapped by
/// `wrap`. Stops early if the receiving session has gone away.
pub async fn forward_chunks<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<StreamEvent>,
    wrap: fn(Vec<String>) -> StreamEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let lines = splitter.push(&buf[..n]);
                if !lines.is_empty() && tx.send(wrap(lines)).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("log stream read failed: {}", e);
                break;
            }
        }
    }

    if let Some(rest) = splitter.finish() {
        let _ = tx.send(wrap(vec![rest]));
    }
}
