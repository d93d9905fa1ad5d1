use crate::error::SinkError;
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

/// Default number of records buffered between workers and the log writer.
pub const DEFAULT_ATTEMPT_BUFFER: usize = 4096;

/// Field written in place of an identifier when a variant produced none.
const ABSENT_FIELD: &str = "-";

/// One tested variant as it appears in the attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub variant: String,
    pub context: String,
    pub identifier: Option<String>,
}

impl AttemptRecord {
    /// Formats the record as a single tab-separated log line, without the
    /// trailing newline. The variant is quoted so leading and trailing
    /// whitespace, and the empty variant, stay visible.
    pub fn to_line(&self) -> String {
        format!(
            "'{}'\t{}\t{}",
            self.variant,
            self.context,
            self.identifier.as_deref().unwrap_or(ABSENT_FIELD)
        )
    }
}

enum SinkMessage {
    Record(AttemptRecord),
    Shutdown,
}

/// Totals reported when an [`AttemptSink`] shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub written: u64,
    pub dropped: u64,
}

/// Single-writer attempt log.
///
/// Producers hold cheap [`AttemptRecorder`] handles that never block; a
/// dedicated thread owns the underlying writer, appends one line per record
/// and flushes after every line. [`AttemptSink::finish`] must be called after
/// all producers are done so the buffer is drained before the writer closes.
pub struct AttemptSink {
    sender: SyncSender<SinkMessage>,
    writer: Option<JoinHandle<Result<u64, SinkError>>>,
    dropped: Arc<AtomicU64>,
}

impl AttemptSink {
    /// Opens (creating if needed) `path` for appending.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Self::with_writer(file, capacity)
    }

    /// Starts a sink over an arbitrary writer. `capacity` is clamped to at least 1.
    pub fn with_writer<W>(writer: W, capacity: usize) -> Result<Self, SinkError>
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("attempt-log".to_string())
            .spawn(move || drain(receiver, writer))?;
        Ok(Self {
            sender,
            writer: Some(handle),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns a producer handle. Handles may be cloned freely and shared
    /// across threads.
    pub fn recorder(&self) -> AttemptRecorder {
        AttemptRecorder {
            sender: self.sender.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Stops the writer after everything already buffered has been written
    /// and flushed.
    pub fn finish(mut self) -> Result<SinkSummary, SinkError> {
        let written = self.shutdown()?;
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("Attempt log dropped {dropped} record(s) under backpressure");
        }
        debug!("Attempt log closed after {written} record(s)");
        Ok(SinkSummary { written, dropped })
    }

    fn shutdown(&mut self) -> Result<u64, SinkError> {
        let Some(handle) = self.writer.take() else {
            return Ok(0);
        };
        // The writer may already have exited after a write error, in which
        // case the join below reports it.
        let _ = self.sender.send(SinkMessage::Shutdown);
        handle.join().map_err(|_| SinkError::WriterPanicked)?
    }
}

impl Drop for AttemptSink {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Attempt log did not shut down cleanly: {e}");
        }
    }
}

fn drain<W: Write>(receiver: Receiver<SinkMessage>, mut writer: W) -> Result<u64, SinkError> {
    let mut written = 0u64;
    for message in receiver {
        match message {
            SinkMessage::Record(record) => {
                writeln!(writer, "{}", record.to_line())?;
                writer.flush()?;
                written += 1;
            }
            SinkMessage::Shutdown => break,
        }
    }
    writer.flush()?;
    Ok(written)
}

/// Producer side of an [`AttemptSink`].
#[derive(Clone)]
pub struct AttemptRecorder {
    sender: SyncSender<SinkMessage>,
    dropped: Arc<AtomicU64>,
}

impl AttemptRecorder {
    /// Queues `entry` without blocking. If the buffer is full or the writer
    /// has gone away the record is dropped and `false` is returned; the first
    /// drop is logged as a warning.
    pub fn record(&self, entry: AttemptRecord) -> bool {
        match self.sender.try_send(SinkMessage::Record(entry)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!("Attempt log cannot keep up; dropping records");
                }
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
