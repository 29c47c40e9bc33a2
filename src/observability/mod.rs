//! Observability: logging, metrics, and the JSONL trace stream.
//!
//! None of this changes tracker behavior. Without an installed recorder
//! the metric macros are no-ops, and trace emission never fails the caller.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventEmitter, TraceEntry};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
