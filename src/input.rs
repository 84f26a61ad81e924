//! Line source for standard input
//!
//! A dedicated task reads the input stream line by line and hands each line
//! over a single-slot channel, so a slow consumer holds the reader back by at
//! most one line. The reader never retries: end of stream and read errors are
//! logged and end the task.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Why the line source stopped producing lines
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read input: {0}")]
    Read(#[from] std::io::Error),
    #[error("end of input stream")]
    EndOfStream,
}

/// Consumer side of the line source
///
/// Lines arrive in input order. Once the reader has stopped, [`LineStream::next`]
/// never resolves.
#[derive(Debug)]
pub struct LineStream {
    rx: mpsc::Receiver<Bytes>,
    exhausted: bool,
}

impl LineStream {
    /// Wrap a receiver fed by something other than [`spawn_line_source`]
    pub fn from_receiver(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            exhausted: false,
        }
    }

    /// Next line without its delimiter
    pub async fn next(&mut self) -> Bytes {
        if !self.exhausted {
            if let Some(line) = self.rx.recv().await {
                return line;
            }
            self.exhausted = true;
            debug!("Line source exhausted");
        }
        std::future::pending().await
    }

    /// Whether the reader has stopped and every line was consumed
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Start reading `reader` on its own task
pub fn spawn_line_source<R>(reader: R, cancel: CancellationToken) -> (LineStream, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        match read_lines(reader, tx, &cancel).await {
            Ok(()) => debug!("Line source stopped"),
            Err(InputError::EndOfStream) => info!("Input stream closed"),
            Err(e) => error!(error = %e, "Line source stopped"),
        }
    });
    (LineStream::from_receiver(rx), handle)
}

/// Read loop; returns `Ok` when cancelled or when the consumer went away
async fn read_lines<R>(
    reader: R,
    tx: mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> Result<(), InputError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            return Err(InputError::EndOfStream);
        }

        let line = Bytes::copy_from_slice(strip_line_ending(&buf));
        trace!(len = line.len(), "Read input line");

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = tx.send(line) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
