use crate::error::TransportError;
use crate::trace::export::{Envelope, Transport};
use std::sync::{Arc, Mutex};

/// An in-memory transport that stores submitted envelopes.
///
/// This transport is useful for testing and debugging purposes: clones share
/// one buffer, so a test can keep a handle and assert on what a tracer
/// emitted.
///
/// # Example
///
/// ```
/// use sentry_trace_core::trace::{InMemoryTransport, Tracer, TransactionContext};
/// use sentry_trace_core::Config;
///
/// let transport = InMemoryTransport::default();
/// let mut config = Config::default();
/// config.traces_sample_rate = Some(1.0);
/// let tracer = Tracer::builder()
///     .with_config(config)
///     .with_transport(transport.clone())
///     .build();
///
/// tracer
///     .start_transaction(TransactionContext::new("demo", "task"))
///     .finish();
///
/// assert_eq!(transport.submitted().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTransport {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
}

impl InMemoryTransport {
    /// Creates an empty transport.
    pub fn new() -> Self {
        InMemoryTransport::default()
    }

    /// Returns the envelopes submitted so far.
    pub fn submitted(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .map(|envelopes| envelopes.clone())
            .unwrap_or_default()
    }

    /// Clears the internal storage of submitted envelopes.
    pub fn reset(&self) {
        let _ = self
            .envelopes
            .lock()
            .map(|mut envelopes| envelopes.clear());
    }
}

impl Transport for InMemoryTransport {
    fn submit(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.envelopes
            .lock()
            .map(|mut envelopes| envelopes.push(envelope))
            .map_err(|_| TransportError::Other("transport buffer poisoned".to_owned()))
    }
}
