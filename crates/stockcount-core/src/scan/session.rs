//! Camera → bounded channel → confidence buffer pipeline.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{ConfidenceBuffer, DedupCache, DuplicateCheck, ScanSignal};

/// One raw decode from the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScan {
    pub code: String,
    pub at_ms: i64,
}

/// A trusted scan, annotated with the dedup verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedScan {
    pub code: String,
    pub accepted_at: i64,
    /// Recorded within the dedup window; a warning, not a rejection
    pub duplicate: DuplicateCheck,
}

/// Output of [`ScanSession::next_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Tentative { code: String, count: u32 },
    Accepted(AcceptedScan),
}

/// Camera side of a scan session.
#[derive(Debug, Clone)]
pub struct ScanProducer {
    tx: mpsc::Sender<RawScan>,
}

impl ScanProducer {
    /// Submit a decode without waiting. Returns false when the frame was
    /// dropped because the channel is full or the session ended.
    pub fn submit(&self, code: impl Into<String>, at_ms: i64) -> bool {
        let scan = RawScan {
            code: code.into(),
            at_ms,
        };
        match self.tx.try_send(scan) {
            Ok(()) => true,
            Err(TrySendError::Full(scan)) => {
                tracing::trace!(code = %scan.code, "Scan channel full; frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Submit a decode, waiting for channel capacity.
    pub async fn send(&self, code: impl Into<String>, at_ms: i64) -> bool {
        self.tx
            .send(RawScan {
                code: code.into(),
                at_ms,
            })
            .await
            .is_ok()
    }
}

/// Consumer side: owns the ephemeral buffer and dedup state.
#[derive(Debug)]
pub struct ScanSession {
    rx: mpsc::Receiver<RawScan>,
    buffer: ConfidenceBuffer,
    dedup: DedupCache,
}

/// Open a scan session with a bounded channel of `capacity` frames.
pub fn scan_channel(
    capacity: usize,
    buffer: ConfidenceBuffer,
    dedup: DedupCache,
) -> (ScanProducer, ScanSession) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ScanProducer { tx },
        ScanSession { rx, buffer, dedup },
    )
}

impl ScanSession {
    /// Next tentative or accepted signal. `None` once every producer is gone,
    /// at which point the session state has been discarded.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        loop {
            let Some(raw) = self.rx.recv().await else {
                self.end();
                return None;
            };

            match self.buffer.observe(&raw.code, raw.at_ms) {
                ScanSignal::Ignored => {}
                ScanSignal::Tentative { code, count } => {
                    return Some(ScanEvent::Tentative { code, count });
                }
                ScanSignal::Accepted(code) => {
                    let duplicate = self.dedup.check_duplicate(&code);
                    self.dedup.record_scan(&code);
                    tracing::debug!(
                        %code,
                        duplicate = duplicate.is_duplicate,
                        "Scan accepted"
                    );
                    return Some(ScanEvent::Accepted(AcceptedScan {
                        code,
                        accepted_at: raw.at_ms,
                        duplicate,
                    }));
                }
            }
        }
    }

    /// Next accepted scan, skipping tentative feedback.
    pub async fn next_accepted(&mut self) -> Option<AcceptedScan> {
        loop {
            match self.next_event().await? {
                ScanEvent::Accepted(scan) => return Some(scan),
                ScanEvent::Tentative { .. } => {}
            }
        }
    }

    pub const fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    fn end(&mut self) {
        self.buffer.reset();
        self.dedup.clear();
    }
}
