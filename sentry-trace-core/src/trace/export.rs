//! The interface to the transport collaborator.
//!
//! The tracer hands finished, immutable trace trees to a [`Transport`].
//! Delivery concerns — batching, retries, backoff, rate limits — live behind
//! the trait and are not specified here.

use crate::envelope::EnvelopeHeader;
use crate::trace::span::{SpanStatus, Value};
use crate::trace::transaction::TransactionSource;
use crate::trace::{SpanId, TraceId};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

pub use crate::error::TransportError;

/// An immutable finished span, ready for serialization.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct FinishedSpan {
    /// The trace the span belongs to.
    pub trace_id: TraceId,
    /// The span's own id.
    pub span_id: SpanId,
    /// The parent span, absent for a root that was not continued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Human readable description of the operation.
    pub name: Cow<'static, str>,
    /// Operation label such as `http.server` or `db.sql.query`.
    pub op: Cow<'static, str>,
    /// When the operation started.
    #[serde(serialize_with = "crate::util::serialize_system_time")]
    pub start_timestamp: SystemTime,
    /// When the operation finished.
    #[serde(
        rename = "timestamp",
        serialize_with = "crate::util::serialize_system_time"
    )]
    pub end_timestamp: SystemTime,
    /// Final status of the operation.
    #[serde(skip_serializing_if = "SpanStatus::is_unset")]
    pub status: SpanStatus,
    /// Scalar attributes recorded on the span.
    #[serde(rename = "data", skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Value>,
    /// Which instrumentation created the span.
    pub origin: Cow<'static, str>,
    /// The trace-wide sampling decision.
    pub sampled: bool,
}

/// A finished transaction: the root span plus all finished descendants.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct FinishedTransaction {
    /// Name of the transaction.
    pub name: Cow<'static, str>,
    /// How the name was derived.
    pub source: TransactionSource,
    /// The sample rate that produced the decision, if known locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    /// The root span.
    pub root: FinishedSpan,
    /// The finished descendants, in start order.
    pub spans: Vec<FinishedSpan>,
}

impl FinishedTransaction {
    /// The id of the trace this transaction recorded.
    pub fn trace_id(&self) -> TraceId {
        self.root.trace_id
    }

    /// Total number of spans in the tree, root included.
    pub fn span_count(&self) -> usize {
        self.spans.len() + 1
    }
}

/// One outgoing payload: a finished trace tree plus its envelope header.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    /// Header block carrying the frozen dynamic sampling context.
    pub header: EnvelopeHeader,
    /// The finished trace tree.
    pub transaction: FinishedTransaction,
}

/// Accepts finished trace trees for delivery.
///
/// `submit` must not block on I/O; implementations enqueue and deliver on
/// their own schedule. An error return means the envelope was not accepted —
/// the tracer records the loss in the client report and moves on.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Hands one envelope to the transport.
    fn submit(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Discards every envelope. Used when no transport has been configured.
#[derive(Clone, Debug, Default)]
pub struct NoopTransport {
    _private: (),
}

impl Transport for NoopTransport {
    fn submit(&self, _envelope: Envelope) -> Result<(), TransportError> {
        crate::sdk_debug!(
            name: "Transport.Noop",
            message = "no transport configured, envelope discarded"
        );
        Ok(())
    }
}
