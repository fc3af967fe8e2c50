//! The tracing core of a Sentry-protocol observability SDK.
//!
//! This crate tracks nested execution context ([`scope`]), builds trees of
//! timed spans representing units of work ([`trace`]), decides
//! probabilistically which traces to record, and encodes/decodes the
//! trace-continuity metadata ([`propagation`]) that lets a trace span process
//! and service boundaries. Dropped telemetry is counted for self-reporting
//! ([`client_report`]).
//!
//! It deliberately stops at the transport boundary: finished trace trees are
//! handed to a [`Transport`] implementation together with their envelope
//! header, and delivery, retries and rate limiting are somebody else's job.
//! Nothing in this crate panics across the public boundary — every failure
//! degrades to "produce no telemetry for this unit of work".
//!
//! # Getting started
//!
//! ```
//! use sentry_trace_core::trace::{InMemoryTransport, TransactionContext};
//! use sentry_trace_core::{Config, SpanStatus, Tracer};
//!
//! let transport = InMemoryTransport::default();
//! let mut config = Config::default();
//! config.traces_sample_rate = Some(1.0);
//! config.release = Some("backend@1.2.3".into());
//!
//! let tracer = Tracer::builder()
//!     .with_config(config)
//!     .with_transport(transport.clone())
//!     .build();
//!
//! let transaction = tracer.start_transaction(TransactionContext::new("checkout", "http.server"));
//! let query = transaction.start_child("SELECT FROM orders", "db.sql.query");
//! query.finish_with_status(SpanStatus::Ok);
//! transaction.finish();
//!
//! let submitted = transport.submitted();
//! assert_eq!(submitted.len(), 1);
//! assert_eq!(submitted[0].transaction.span_count(), 2);
//! ```
//!
//! # Continuing a distributed trace
//!
//! ```
//! use sentry_trace_core::trace::TransactionContext;
//! use sentry_trace_core::Tracer;
//!
//! let tracer = Tracer::builder().build();
//!
//! // Headers from an inbound request. The upstream decision is inherited
//! // verbatim; a malformed header simply starts a fresh trace.
//! let ctx = TransactionContext::continue_from_headers(
//!     "GET /checkout",
//!     "http.server",
//!     Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-1"),
//!     None,
//! );
//! let transaction = tracer.start_transaction(ctx);
//! assert!(transaction.is_sampled());
//! ```

#![warn(missing_docs)]

pub mod client_report;
pub mod config;
pub mod envelope;
pub mod propagation;
pub mod scope;
pub mod trace;

mod error;
mod macros;
pub(crate) mod util;

pub use client_report::{
    ClientReport, ClientReportAggregator, DataCategory, DiscardReason, DiscardedEvent,
};
pub use config::{Config, TargetPattern, TracePropagationTargets};
pub use envelope::{DynamicSamplingContext, EnvelopeHeader};
pub use error::{PropagationError, TransportError};
pub use scope::Scope;
pub use trace::{
    Sampler, SamplingContext, SamplingResult, Span, SpanContext, SpanId, SpanStatus, TraceId,
    Tracer, TracesSampler, Transaction, TransactionContext, TransactionSource, Transport, Value,
};

#[doc(hidden)]
pub mod _private {
    #[cfg(feature = "internal-logs")]
    pub use tracing::{debug, info, warn};
}
