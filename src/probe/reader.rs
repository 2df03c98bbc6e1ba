//! Line Reader: drains one subprocess output channel into logical lines.
//!
//! Reads in small chunks, carries an incomplete trailing fragment across
//! reads, and emits the final fragment even without a terminator. Each
//! channel runs as its own task feeding an unbounded queue, so the
//! diagnostic subprocess is never back-pressured by detection work. Lines
//! are stamped when read, not when the worker gets to them.

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Size of each read from the subprocess pipe.
pub const CHUNK_SIZE: usize = 1024;

/// Which subprocess output a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Item delivered from a reader task to the worker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderMessage {
    /// One complete logical line without its terminator.
    Line {
        /// Line text.
        text: String,
        /// When the reader pulled the line off the pipe.
        received_at: Instant,
    },
    /// The channel reached end-of-stream. Sent exactly once, last.
    Closed(Channel),
}

impl ReaderMessage {
    fn line(text: String) -> Self {
        Self::Line {
            text,
            received_at: Instant::now(),
        }
    }

    /// Line text, or `None` for [`ReaderMessage::Closed`].
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Line { text, .. } => Some(text.as_str()),
            Self::Closed(_) => None,
        }
    }
}

/// Incremental byte-to-line splitter.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed.
    ///
    /// `\n` terminates a line; a trailing `\r` before it is dropped.
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(self.take_line());
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush the trailing fragment at end-of-stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

/// Spawn a task draining `stream` into `tx` until end-of-stream.
///
/// A read error is treated like end-of-stream. The task always finishes by
/// sending [`ReaderMessage::Closed`], unless the receiver is gone.
pub fn spawn_reader<R>(
    mut stream: R,
    tx: mpsc::UnboundedSender<ReaderMessage>,
    channel: Channel,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf.get(..n).unwrap_or_default();
                    for line in splitter.push(chunk) {
                        if tx.send(ReaderMessage::line(line)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(?channel, error = %e, "read failed, closing channel");
                    break;
                }
            }
        }

        if let Some(line) = splitter.finish() {
            let _ = tx.send(ReaderMessage::line(line));
        }
        let _ = tx.send(ReaderMessage::Closed(channel));
    })
}
