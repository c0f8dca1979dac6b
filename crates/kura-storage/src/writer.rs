//! Output streams that report their change when closed.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{debug, error};

use crate::events::{ChangeEvent, ChangeNotifier};

/// Change reported once the stream is closed.
struct PendingChange {
    notifier: Arc<ChangeNotifier>,
    event: ChangeEvent,
}

enum State {
    Open {
        sink: Box<dyn Write + Send>,
        pending: Option<PendingChange>,
    },
    Closed,
}

/// Writable handle to an entry.
///
/// The change event fires at most once: on the first successful
/// [`close`](EntryWriter::close), after the sink has been flushed and
/// released. Later calls to `close` do nothing. Dropping an open writer
/// closes it; errors at that point can only be logged.
pub struct EntryWriter {
    path: String,
    state: State,
}

impl std::fmt::Debug for EntryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryWriter")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EntryWriter {
    /// Writer that delivers `event` through `notifier` when closed.
    pub fn notifying(
        path: impl Into<String>,
        sink: Box<dyn Write + Send>,
        notifier: Arc<ChangeNotifier>,
        event: ChangeEvent,
    ) -> Self {
        Self {
            path: path.into(),
            state: State::Open {
                sink,
                pending: Some(PendingChange { notifier, event }),
            },
        }
    }

    /// Writer without change notification.
    pub fn plain(path: impl Into<String>, sink: Box<dyn Write + Send>) -> Self {
        Self {
            path: path.into(),
            state: State::Open {
                sink,
                pending: None,
            },
        }
    }

    /// Logical path being written.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Flush and release the sink, then deliver the pending change.
    ///
    /// The writer is closed afterwards whatever the outcome. If flushing
    /// fails the error is returned and no change is reported.
    pub fn close(&mut self) -> io::Result<()> {
        let State::Open { mut sink, pending } = std::mem::replace(&mut self.state, State::Closed)
        else {
            return Ok(());
        };

        sink.flush()?;
        drop(sink);

        if let Some(PendingChange { notifier, event }) = pending {
            debug!("closed {}, reporting {}", self.path, event);
            notifier.notify_changed(&event);
        }
        Ok(())
    }

    fn sink(&mut self) -> io::Result<&mut Box<dyn Write + Send>> {
        match &mut self.state {
            State::Open { sink, .. } => Ok(sink),
            State::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("writer for '{}' is closed", self.path),
            )),
        }
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink()?.flush()
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("closing {} on drop failed: {}", self.path, e);
        }
    }
}
