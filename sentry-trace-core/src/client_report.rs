//! Client reports: self-reporting of discarded telemetry.
//!
//! Every point in the pipeline that discards telemetry for policy reasons
//! (unsampled trace, queue overflow, a veto hook) records the drop here, so
//! the loss is observable in aggregate even though no error is raised.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// The kind of telemetry a discarded item belonged to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DataCategory {
    /// Error events.
    Error,
    /// Root transactions with their span trees.
    Transaction,
    /// Individual spans.
    Span,
    /// Attachments.
    Attachment,
    /// Session replays.
    Replay,
}

/// Why an item was discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DiscardReason {
    /// The trace was not sampled.
    SampleRate,
    /// A before-send hook vetoed the item.
    BeforeSend,
    /// An event processor removed the item.
    EventProcessor,
    /// The transport queue was full.
    QueueOverflow,
    /// The transport failed to deliver the item.
    NetworkError,
    /// The server asked the client to back off.
    RatelimitBackoff,
    /// An internal error prevented the item from being emitted.
    Internal,
}

/// One aggregated counter in a [`ClientReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscardedEvent {
    /// Why the items were discarded.
    pub reason: DiscardReason,
    /// What kind of items were discarded.
    pub category: DataCategory,
    /// How many items were discarded since the last flush.
    pub quantity: u64,
}

/// A drained snapshot of all drop counters, ready for periodic emission.
#[derive(Clone, Debug, Serialize)]
pub struct ClientReport {
    /// When the report was assembled.
    #[serde(serialize_with = "crate::util::serialize_system_time")]
    pub timestamp: SystemTime,
    /// The non-zero counters accumulated since the last flush.
    pub discarded_events: Vec<DiscardedEvent>,
}

/// Counts discarded telemetry by `(reason, category)` for self-reporting.
///
/// The aggregator is cheap to clone and safe to update from concurrent
/// execution contexts. Counters merge by addition; a flush atomically reads
/// and resets them, so no drop recorded between flushes is ever lost.
#[derive(Clone, Debug, Default)]
pub struct ClientReportAggregator {
    counters: Arc<Mutex<HashMap<(DiscardReason, DataCategory), u64>>>,
}

impl ClientReportAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one discarded item.
    pub fn record_drop(&self, reason: DiscardReason, category: DataCategory) {
        self.record_drops(reason, category, 1);
    }

    /// Records `quantity` discarded items at once.
    pub fn record_drops(&self, reason: DiscardReason, category: DataCategory, quantity: u64) {
        if quantity == 0 {
            return;
        }
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry((reason, category)).or_insert(0) += quantity;
        }
    }

    /// Atomically drains all counters into a report, or `None` if nothing was
    /// discarded since the last flush.
    pub fn flush_and_clear(&self) -> Option<ClientReport> {
        let drained = self
            .counters
            .lock()
            .map(|mut counters| std::mem::take(&mut *counters))
            .unwrap_or_default();

        if drained.is_empty() {
            return None;
        }

        let mut discarded_events: Vec<DiscardedEvent> = drained
            .into_iter()
            .map(|((reason, category), quantity)| DiscardedEvent {
                reason,
                category,
                quantity,
            })
            .collect();
        // Deterministic order for serialization and assertions.
        discarded_events.sort_by_key(|event| (event.reason as u8, event.category as u8));

        Some(ClientReport {
            timestamp: SystemTime::now(),
            discarded_events,
        })
    }
}
