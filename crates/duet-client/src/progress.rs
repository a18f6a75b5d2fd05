//! Per-transfer progress accumulation.
//!
//! Transfer backends report bytes as fast as they move them. The UI only
//! needs a few updates a second, so each transfer gets an accumulator that
//! applies the first report at once, coalesces the ones arriving inside the
//! throttle window, and releases the newest of those on the next report
//! past the window or when the transfer completes.

use std::time::{Duration, Instant};

use serde::Serialize;

use duet_net::TransferProgress;
use duet_shared::format::{format_in, SizeUnit};
use duet_shared::MessageId;

/// Progress shown next to an in-flight attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    pub id: MessageId,
    /// Bytes moved so far, in the unit of `size`, without the label.
    pub transferred: Option<String>,
    /// Total size with its unit, e.g. `"3.4 MB"`.
    pub size: String,
}

#[derive(Debug)]
pub struct ProgressAccumulator {
    id: MessageId,
    interval: Duration,
    /// Chosen on the first report and kept for the whole transfer.
    unit: Option<SizeUnit>,
    size: String,
    last_applied: Option<Instant>,
    pending: Option<TransferProgress>,
}

impl ProgressAccumulator {
    /// `size` is the message's own size label, shown until the backend
    /// reports a total.
    pub fn new(id: MessageId, size: Option<String>, interval: Duration) -> Self {
        Self {
            id,
            interval,
            unit: None,
            size: size.unwrap_or_default(),
            last_applied: None,
            pending: None,
        }
    }

    /// Entry published when the transfer starts, before any bytes move.
    pub fn initial(&self) -> ProgressEntry {
        ProgressEntry {
            id: self.id.clone(),
            transferred: None,
            size: self.size.clone(),
        }
    }

    pub fn unit(&self) -> Option<SizeUnit> {
        self.unit
    }

    /// Feed one backend report. Returns the entry to apply now, if any.
    pub fn record(&mut self, progress: TransferProgress, now: Instant) -> Option<ProgressEntry> {
        let basis = if progress.total > 0 {
            progress.total
        } else {
            progress.transferred
        };
        let unit = *self.unit.get_or_insert_with(|| SizeUnit::for_bytes(basis));

        if progress.total > 0 {
            self.size = format!("{} {}", format_in(progress.total, unit), unit);
        }

        let due = match self.last_applied {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.interval,
        };

        if due {
            self.last_applied = Some(now);
            self.pending = None;
            Some(self.render(progress, unit))
        } else {
            self.pending = Some(progress);
            None
        }
    }

    /// Release the coalesced report, if one is waiting. Called when the
    /// transfer ends so the final byte count is not lost.
    pub fn flush(&mut self) -> Option<ProgressEntry> {
        let progress = self.pending.take()?;
        let unit = self.unit?;
        Some(self.render(progress, unit))
    }

    fn render(&self, progress: TransferProgress, unit: SizeUnit) -> ProgressEntry {
        ProgressEntry {
            id: self.id.clone(),
            transferred: Some(format_in(progress.transferred, unit)),
            size: self.size.clone(),
        }
    }
}
