//! Command queue and drain thread.
//!
//! Decouples command production from device I/O: the frame loop pushes
//! textual commands onto an unbounded FIFO and a single drain thread
//! pops them and performs the blocking sink write.  A write failure is
//! fatal to the drain thread and surfaces through `close_and_drain()`
//! (and early, via `failed()`).  The queue is deliberately unbounded;
//! backpressure is a known gap, not modelled here.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error, info, warn};

/// Sink-side failure, fatal to the drain thread.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink reset failed: {0}")]
    Reset(#[source] io::Error),
    #[error("sink write failed after {written} command(s): {source}")]
    Write {
        written: u64,
        #[source]
        source: io::Error,
    },
}

/// A blocking line-write output channel: a printer port, stdout, or a
/// capture buffer in tests.
pub trait CommandSink: Send {
    /// Bring the channel to a known state.  Called once, before any
    /// write.
    fn reset(&mut self) -> io::Result<()>;
    /// Deliver one command line (no trailing newline in `line`).
    fn write(&mut self, line: &str) -> io::Result<()>;
}

// ── Queue ──────────────────────────────────────────────────

/// FIFO command buffer with one dedicated drain thread.
///
/// `enqueue` never blocks and never fails while the queue is open.
/// `close_and_drain` stops production, waits for every previously
/// enqueued command to reach the sink, and returns the total write
/// count or the first sink error.
pub struct CommandQueue {
    tx: Option<Sender<String>>,
    drain: Option<JoinHandle<Result<u64, SinkError>>>,
    failed: Arc<AtomicBool>,
}

impl CommandQueue {
    /// Reset the sink and spawn the drain thread.
    ///
    /// The reset happens on the caller's thread, before any command
    /// can be enqueued, so it strictly precedes every write.
    pub fn start(mut sink: Box<dyn CommandSink>) -> Result<Self, SinkError> {
        sink.reset().map_err(SinkError::Reset)?;

        let (tx, rx) = unbounded::<String>();
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = Arc::clone(&failed);

        let drain = thread::spawn(move || {
            let mut written: u64 = 0;
            // Blocks when empty; Err means closed and fully drained.
            while let Ok(line) = rx.recv() {
                if let Err(e) = sink.write(&line) {
                    error!("sink write failed: {}", e);
                    failed_flag.store(true, Ordering::SeqCst);
                    return Err(SinkError::Write { written, source: e });
                }
                written += 1;
            }
            debug!("drain thread exiting after {} command(s)", written);
            Ok(written)
        });

        Ok(Self {
            tx: Some(tx),
            drain: Some(drain),
            failed,
        })
    }

    /// Append a command to the tail.  Never blocks.  Commands offered
    /// after close (or after a drain failure) are dropped with a
    /// warning rather than an error.
    pub fn enqueue(&self, line: String) {
        match &self.tx {
            Some(tx) => {
                if tx.send(line).is_err() {
                    warn!("command dropped: drain thread gone");
                }
            }
            None => warn!("command dropped: queue closed"),
        }
    }

    /// Whether the drain thread has died on a sink error.  Commands
    /// enqueued after this point will never be delivered.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Close the queue and wait until everything already enqueued has
    /// been written.  Returns the number of commands delivered.
    pub fn close_and_drain(mut self) -> Result<u64, SinkError> {
        self.tx.take(); // drop the sender: drain sees EOF once empty
        let handle = self.drain.take().expect("drain joined twice");
        match handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Not closed explicitly: let the drain finish on its own, but
        // don't block drop on it.
        self.tx.take();
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }
}

// ── Sinks ──────────────────────────────────────────────────

/// Writes commands to stdout, one per line.
pub struct StdoutSink {
    out: io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl CommandSink for StdoutSink {
    fn reset(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn write(&mut self, line: &str) -> io::Result<()> {
        let mut lock = self.out.lock();
        lock.write_all(line.as_bytes())?;
        lock.write_all(b"\n")?;
        lock.flush()
    }
}

/// Writes newline-terminated commands to a serial character device
/// (or any writable path).  Line-buffered so each command leaves the
/// process as soon as it is written.
pub struct SerialPortSink {
    path: PathBuf,
    port: Option<LineWriter<File>>,
}

impl SerialPortSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            port: None,
        }
    }
}

impl CommandSink for SerialPortSink {
    fn reset(&mut self) -> io::Result<()> {
        // (Re)open the device; dropping a previous handle toggles DTR
        // on common USB serial adapters, resetting the firmware.
        self.port = None;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        info!("serial sink opened: {}", self.path.display());
        self.port = Some(LineWriter::new(file));
        Ok(())
    }

    fn write(&mut self, line: &str) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sink not reset"))?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")
    }
}

/// Discards everything.  Soak-testing sink.
pub struct NullSink;

impl CommandSink for NullSink {
    fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Captures written lines for inspection.  Shared handle so tests can
/// read what arrived after the queue drains.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<std::sync::Mutex<Vec<String>>>,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write once `n` lines have been accepted.
    pub fn failing_after(n: usize) -> Self {
        Self {
            lines: Arc::default(),
            fail_after: Some(n),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock").clone()
    }
}

impl CommandSink for MemorySink {
    fn reset(&mut self) -> io::Result<()> {
        self.lines.lock().expect("sink lock").clear();
        Ok(())
    }

    fn write(&mut self, line: &str) -> io::Result<()> {
        let mut lines = self.lines.lock().expect("sink lock");
        if let Some(limit) = self.fail_after {
            if lines.len() >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink stalled"));
            }
        }
        lines.push(line.to_string());
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────
