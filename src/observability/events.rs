//! JSONL trace stream.
//!
//! Every phase entry and exit, every fired event, and every protocol
//! violation can be written as one JSON line with a monotonically
//! increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{EventId, EventKind};

/// One record of the trace stream, tagged with `"type"`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TraceEntry {
    /// A phase was pushed.
    PhaseEntered {
        /// When
        timestamp: DateTime<Utc>,
        /// Phase kind name
        phase: &'static str,
        /// Phase id
        id: u64,
        /// Depth after the push
        depth: usize,
        /// Rendered cause chain
        cause: String,
    },

    /// A popped phase finished processing.
    PhaseExited {
        /// When
        timestamp: DateTime<Utc>,
        /// Phase kind name
        phase: &'static str,
        /// Phase id
        id: u64,
        /// Whether the phase ended exceptionally
        exceptional: bool,
        /// Events fired
        events: usize,
        /// Effects applied
        applied: usize,
        /// Effects the world rejected
        failed: usize,
        /// Effects dropped by observers
        cancelled: usize,
        /// Effects dropped because the phase failed
        discarded: usize,
    },

    /// An event went through the observers.
    EventFired {
        /// When
        timestamp: DateTime<Utc>,
        /// Event id
        event_id: EventId,
        /// Event kind
        kind: EventKind,
        /// Phase kind name
        phase: &'static str,
        /// Rendered cause chain
        cause: String,
        /// Number of transactions
        transactions: usize,
        /// Whether an observer cancelled it
        cancelled: bool,
    },

    /// The phase protocol was violated.
    ProtocolViolation {
        /// When
        timestamp: DateTime<Utc>,
        /// Violation label
        violation: &'static str,
        /// Error message
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct Envelope {
    sequence: u64,
    #[serde(flatten)]
    entry: TraceEntry,
}

/// Thread-safe, buffered JSONL writer.
///
/// Serialization or I/O failures are dropped: tracing must never change
/// what the tracker does.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes one entry as a JSON line.
    pub fn emit(&self, entry: TraceEntry) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { sequence, entry };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Number of entries emitted so far.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone)]
    struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        fn lines(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emitter_writes_flat_sequenced_lines() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(TraceEntry::PhaseEntered {
            timestamp: Utc::now(),
            phase: "inventory_click",
            id: 1,
            depth: 1,
            cause: "[player:Steve]".to_owned(),
        });
        emitter.emit(TraceEntry::ProtocolViolation {
            timestamp: Utc::now(),
            violation: "unbalanced_pop",
            message: "unbalanced pop".to_owned(),
        });

        assert_eq!(emitter.entry_count(), 2);
        let lines = tw.lines();
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[0]["type"], "PhaseEntered");
        assert_eq!(lines[0]["phase"], "inventory_click");
        assert!(lines[0].get("entry").is_none());
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["violation"], "unbalanced_pop");
    }

    #[test]
    fn event_fired_serializes_kind_in_snake_case() {
        let json = serde_json::to_value(TraceEntry::EventFired {
            timestamp: Utc::now(),
            event_id: EventId(4),
            kind: EventKind::DropItem,
            phase: "inventory_click",
            cause: "[player:Steve]".to_owned(),
            transactions: 1,
            cancelled: false,
        })
        .unwrap();
        assert_eq!(json["kind"], "drop_item");
        assert_eq!(json["event_id"], 4);
    }
}
