//! The span tree: transactions, spans, sampling and the transport hand-off.
//!
//! A trace is a tree of timed spans sharing one [`TraceId`] and one sampling
//! decision. The [`Tracer`] starts transactions (root spans) and children,
//! the [`Sampler`] decides once per trace whether it is recorded, and
//! finished trees are handed to the [`Transport`] collaborator together with
//! their envelope header.

pub mod export;
mod id_generator;
mod in_memory_transport;
mod sampler;
mod span;
mod span_context;
mod tracer;
mod transaction;

pub use export::{Envelope, FinishedSpan, FinishedTransaction, NoopTransport, Transport};
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use in_memory_transport::InMemoryTransport;
pub use sampler::{Sampler, SamplingContext, SamplingResult, TracesSampler};
pub use span::{Span, SpanStatus, Value};
pub use span_context::{SpanContext, SpanId, TraceId};
pub use tracer::{Tracer, TracerBuilder};
pub use transaction::{Transaction, TransactionContext, TransactionSource};
