//! Scan input: confidence buffer, dedup cache and the session channel.

mod confidence;
mod dedup;
mod session;

pub use confidence::{BufferState, ConfidenceBuffer, ScanBufferConfig, ScanBufferEntry, ScanSignal};
pub use dedup::{DedupCache, DuplicateCheck, DEFAULT_DEDUP_WINDOW};
pub use session::{scan_channel, AcceptedScan, RawScan, ScanEvent, ScanProducer, ScanSession};
