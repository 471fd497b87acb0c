//! Traffic recorder
//!
//! Every service (ingress) and every client (egress) owns one recorder:
//! a fixed ring of the 64 most recent calls held in memory for the
//! diagnostic endpoint, and an optional append-only binary log file
//! holding the raw bytes exactly as they were transmitted.
//!
//! Publishing is best-effort. Writers hand the recorder a three-part
//! byte record over a bounded channel and never block or retry; a
//! dedicated task drains the channel, overwrites the next ring slot and
//! appends to the file. A file write failure closes the file and leaves
//! the recorder in-memory-only for the rest of its life.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Capacity of the in-memory ring of recent calls.
pub const RECENT_CALLS: usize = 64;

/// Raw bytes of one completed round trip.
///
/// `request_size` and `request` are the two halves of the request frame;
/// `response` is the full response frame including its length prefix.
/// Appending the three parts in order reproduces the exact byte stream
/// that crossed the socket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallRecord {
    pub request_size: Vec<u8>,
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

impl CallRecord {
    pub fn new(request_size: Vec<u8>, request: Vec<u8>, response: Vec<u8>) -> Self {
        Self {
            request_size,
            request,
            response,
        }
    }
}

/// Which way the recorded traffic flowed, relative to this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Requests served by a local service.
    Ingress,
    /// Calls issued by a local client.
    Egress,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

/// Fixed-capacity circular buffer of [`CallRecord`]s, oldest overwritten
/// first.
#[derive(Debug)]
pub struct RecentRing {
    slots: Vec<Option<CallRecord>>,
    next: usize,
}

impl RecentRing {
    fn new() -> Self {
        Self {
            slots: vec![None; RECENT_CALLS],
            next: 0,
        }
    }

    fn push(&mut self, record: CallRecord) {
        self.slots[self.next] = Some(record);
        self.next = (self.next + 1) % RECENT_CALLS;
    }

    /// Records in arrival order, oldest first.
    pub fn snapshot(&self) -> Vec<CallRecord> {
        let mut out = Vec::new();
        for offset in 0..RECENT_CALLS {
            let idx = (self.next + offset) % RECENT_CALLS;
            if let Some(record) = &self.slots[idx] {
                out.push(record.clone());
            }
        }
        out
    }
}

/// Shared read handle onto a recorder's ring, for introspection readers.
pub type RingHandle = Arc<RwLock<RecentRing>>;

pub struct Recorder {
    name: String,
    tx: Mutex<Option<mpsc::Sender<CallRecord>>>,
    ring: RingHandle,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Spawns a recorder and its drain task.
    ///
    /// With a binary-log directory the backing file is
    /// `{name}-ingress.log` for services and `{name}-egress-{hex}.log`
    /// for clients, the hex suffix being the spawn time in nanoseconds
    /// so concurrent clients of the same service stay apart. `None`
    /// disables persistence. A file that cannot be created is logged
    /// and skipped; the ring still records.
    pub fn spawn(name: &str, direction: Direction, binary_log_dir: Option<&Path>) -> Self {
        let file = binary_log_dir.and_then(|dir| open_log(dir, name, direction));
        let ring: RingHandle = Arc::new(RwLock::new(RecentRing::new()));
        let (tx, rx) = mpsc::channel(RECENT_CALLS);

        let drain = tokio::spawn(drain_loop(rx, Arc::clone(&ring), file));

        Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            ring,
            drain: Mutex::new(Some(drain)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands a record to the drain task. Never blocks; if the channel is
    /// full or the recorder is closed the record is dropped.
    pub fn publish(&self, record: CallRecord) {
        let guard = self.tx.lock().expect("recorder sender lock");
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(record).is_err() {
                debug!(recorder = %self.name, "recorder channel full, dropping record");
            }
        }
    }

    /// Snapshot of the ring, oldest record first.
    pub fn recent(&self) -> Vec<CallRecord> {
        self.ring.read().expect("recorder ring lock").snapshot()
    }

    /// Shared handle for introspection readers.
    pub fn ring_handle(&self) -> RingHandle {
        Arc::clone(&self.ring)
    }

    /// Stops accepting records, waits for the drain task to finish the
    /// backlog and closes the file.
    pub async fn close(&self) {
        let tx = self.tx.lock().expect("recorder sender lock").take();
        drop(tx);
        let drain = self.drain.lock().expect("recorder drain lock").take();
        if let Some(handle) = drain {
            let _ = handle.await;
        }
    }
}

fn open_log(dir: &Path, name: &str, direction: Direction) -> Option<(PathBuf, File)> {
    let file_name = match direction {
        Direction::Ingress => format!("{}-{}.log", name, direction.as_str()),
        Direction::Egress => {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            format!("{}-{}-{:x}.log", name, direction.as_str(), nanos)
        }
    };
    let path = dir.join(file_name);
    match File::create(&path) {
        Ok(file) => Some((path, file)),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to create binary log");
            None
        }
    }
}

async fn drain_loop(
    mut rx: mpsc::Receiver<CallRecord>,
    ring: RingHandle,
    mut file: Option<(PathBuf, File)>,
) {
    while let Some(record) = rx.recv().await {
        {
            let mut guard = ring.write().expect("recorder ring lock");
            guard.push(record.clone());
        }

        let mut write_failed = false;
        if let Some((path, f)) = file.as_mut() {
            let result = f
                .write_all(&record.request_size)
                .and_then(|_| f.write_all(&record.request))
                .and_then(|_| f.write_all(&record.response));
            if let Err(e) = result {
                error!(
                    path = %path.display(),
                    error = %e,
                    "failed to write binary log, it is now closed and may be compromised"
                );
                write_failed = true;
            }
        }
        if write_failed {
            file = None;
        }
    }

    if let Some((path, _)) = file {
        info!(path = %path.display(), "binary log is now closed");
    }
}
