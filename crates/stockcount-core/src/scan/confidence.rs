//! Multi-read consensus filter for noisy barcode decodes.

use std::time::Duration;

/// Tuning for [`ConfidenceBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBufferConfig {
    /// Consistent reads required before a code is accepted
    pub threshold: u32,
    /// Entries without a read for longer than this are evicted
    pub timeout: Duration,
    /// Distinct codes tracked at once
    pub max_size: usize,
}

impl Default for ScanBufferConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            timeout: Duration::from_millis(1500),
            max_size: 5,
        }
    }
}

/// One candidate code in the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBufferEntry {
    pub code: String,
    pub count: u32,
    /// Time of the most recent read (unix ms)
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Idle,
    Accumulating,
}

/// Result of feeding one decode event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSignal {
    /// Blank read, nothing changed
    Ignored,
    /// Seen but not trusted yet; used for light feedback only
    Tentative { code: String, count: u32 },
    /// Threshold reached; the buffer has been cleared
    Accepted(String),
}

/// Converts a stream of raw decodes into single trusted scans.
///
/// Performs no I/O and is driven entirely by the timestamps it is given.
#[derive(Debug, Clone)]
pub struct ConfidenceBuffer {
    config: ScanBufferConfig,
    entries: Vec<ScanBufferEntry>,
}

impl Default for ConfidenceBuffer {
    fn default() -> Self {
        Self::new(ScanBufferConfig::default())
    }
}

impl ConfidenceBuffer {
    pub fn new(config: ScanBufferConfig) -> Self {
        Self {
            config,
            entries: Vec::with_capacity(config.max_size.saturating_add(1)),
        }
    }

    pub fn state(&self) -> BufferState {
        if self.entries.is_empty() {
            BufferState::Idle
        } else {
            BufferState::Accumulating
        }
    }

    pub fn entries(&self) -> &[ScanBufferEntry] {
        &self.entries
    }

    /// Feed one decode of `raw` observed at `at_ms`.
    pub fn observe(&mut self, raw: &str, at_ms: i64) -> ScanSignal {
        let code = raw.trim();
        if code.is_empty() {
            return ScanSignal::Ignored;
        }

        self.evict_stale(at_ms);

        let count = match self.entries.iter_mut().find(|entry| entry.code == code) {
            Some(entry) => {
                entry.count = entry.count.saturating_add(1);
                entry.timestamp = at_ms;
                entry.count
            }
            None => {
                self.entries.push(ScanBufferEntry {
                    code: code.to_string(),
                    count: 1,
                    timestamp: at_ms,
                });
                1
            }
        };

        if self.entries.len() > self.config.max_size {
            self.evict_oldest();
        }

        let accepted = self
            .entries
            .iter()
            .find(|entry| entry.count >= self.config.threshold)
            .map(|entry| entry.code.clone());
        if let Some(accepted) = accepted {
            self.entries.clear();
            return ScanSignal::Accepted(accepted);
        }

        // The observed code may itself have been the one evicted for size
        if self.entries.iter().any(|entry| entry.code == code) {
            ScanSignal::Tentative {
                code: code.to_string(),
                count,
            }
        } else {
            ScanSignal::Ignored
        }
    }

    /// Discard all candidates, e.g. when the scan session ends.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    fn evict_stale(&mut self, at_ms: i64) {
        let timeout = i64::try_from(self.config.timeout.as_millis()).unwrap_or(i64::MAX);
        self.entries
            .retain(|entry| at_ms.saturating_sub(entry.timestamp) <= timeout);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.timestamp)
            .map(|(index, _)| index)
        {
            self.entries.remove(oldest);
        }
    }
}
