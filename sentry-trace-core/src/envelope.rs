//! Dynamic sampling context and the envelope trace header.
//!
//! The dynamic sampling context (DSC) is a frozen, stringly-typed map derived
//! once per trace. The first process to materialize it is authoritative for
//! the whole distributed trace: downstream services adopt it verbatim from
//! the baggage header and never recompute it, so every participant observes
//! the original sampling decision.

use crate::config::Config;
use crate::propagation::Baggage;
use crate::scope::Scope;
use crate::trace::{TraceId, TransactionSource};
use serde::{Deserialize, Serialize};

/// The frozen trace metadata propagated in `sentry-` baggage entries and in
/// the envelope trace header.
///
/// All values are strings on the wire; see the field set used by the ingest
/// side. Absent fields are omitted entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DynamicSamplingContext {
    /// Hex id of the trace this context describes.
    pub trace_id: String,

    /// Public key of the project that started the trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// The sampling decision, `"true"` or `"false"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<String>,

    /// The sample rate that produced the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<String>,

    /// Name of the root transaction, omitted for high-cardinality URL names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,

    /// Release of the SDK host application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    /// Deployment environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Segment of the user the trace belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_segment: Option<String>,

    /// Id of the session replay recorded alongside the trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_id: Option<String>,
}

const TRACE_ID_KEY: &str = "sentry-trace_id";
const PUBLIC_KEY_KEY: &str = "sentry-public_key";
const SAMPLED_KEY: &str = "sentry-sampled";
const SAMPLE_RATE_KEY: &str = "sentry-sample_rate";
const TRANSACTION_KEY: &str = "sentry-transaction";
const RELEASE_KEY: &str = "sentry-release";
const ENVIRONMENT_KEY: &str = "sentry-environment";
const USER_SEGMENT_KEY: &str = "sentry-user_segment";
const REPLAY_ID_KEY: &str = "sentry-replay_id";

impl DynamicSamplingContext {
    /// Reads a frozen context from incoming baggage.
    ///
    /// Returns `None` when the baggage carries no `sentry-trace_id`, meaning
    /// no upstream service has materialized a context yet. Unrecognized
    /// `sentry-` entries are dropped; third-party entries are not this
    /// function's concern and stay untouched in the [`Baggage`].
    pub fn from_baggage(baggage: &Baggage) -> Option<Self> {
        let trace_id = baggage.get(TRACE_ID_KEY)?.into_owned();
        let get = |key: &str| baggage.get(key).map(|value| value.into_owned());

        Some(DynamicSamplingContext {
            trace_id,
            public_key: get(PUBLIC_KEY_KEY),
            sampled: get(SAMPLED_KEY),
            sample_rate: get(SAMPLE_RATE_KEY),
            transaction: get(TRANSACTION_KEY),
            release: get(RELEASE_KEY),
            environment: get(ENVIRONMENT_KEY),
            user_segment: get(USER_SEGMENT_KEY),
            replay_id: get(REPLAY_ID_KEY),
        })
    }

    /// Writes this context into `baggage`, replacing any previous `sentry-`
    /// entries and leaving third-party entries verbatim.
    pub fn apply_to_baggage(&self, baggage: &mut Baggage) {
        baggage.clear_sentry_entries();
        baggage.insert(TRACE_ID_KEY, &self.trace_id);
        let mut set = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                baggage.insert(key, value);
            }
        };
        set(PUBLIC_KEY_KEY, &self.public_key);
        set(SAMPLED_KEY, &self.sampled);
        set(SAMPLE_RATE_KEY, &self.sample_rate);
        set(TRANSACTION_KEY, &self.transaction);
        set(RELEASE_KEY, &self.release);
        set(ENVIRONMENT_KEY, &self.environment);
        set(USER_SEGMENT_KEY, &self.user_segment);
        set(REPLAY_ID_KEY, &self.replay_id);
    }

    /// The sample rate as a number, if present and parseable.
    pub fn sample_rate_value(&self) -> Option<f64> {
        self.sample_rate.as_deref().and_then(|rate| rate.parse().ok())
    }

    /// Materializes a fresh context for a locally started trace.
    ///
    /// Transaction names derived from raw URLs are too high-cardinality to be
    /// useful for sampling rules and are omitted.
    pub(crate) fn from_parts(
        trace_id: TraceId,
        sampled: bool,
        sample_rate: Option<f64>,
        transaction_name: &str,
        source: TransactionSource,
        config: &Config,
        scope: &Scope,
    ) -> Self {
        let transaction = (source != TransactionSource::Url && !transaction_name.is_empty())
            .then(|| transaction_name.to_owned());

        DynamicSamplingContext {
            trace_id: trace_id.to_string(),
            public_key: config.public_key.as_ref().map(|key| key.to_string()),
            sampled: Some(sampled.to_string()),
            sample_rate: sample_rate.map(|rate| rate.to_string()),
            transaction,
            release: config.release.as_ref().map(|release| release.to_string()),
            environment: config
                .environment
                .as_ref()
                .map(|environment| environment.to_string()),
            user_segment: scope
                .user()
                .and_then(|user| user.segment.as_ref())
                .cloned(),
            replay_id: scope.replay_id().map(str::to_owned),
        }
    }
}

/// The structured header block attached to outgoing telemetry envelopes.
///
/// Transport owns the envelope framing; this is the `trace` key it embeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnvelopeHeader {
    /// The frozen dynamic sampling context of the trace.
    pub trace: DynamicSamplingContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dsc() -> DynamicSamplingContext {
        DynamicSamplingContext {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_owned(),
            public_key: Some("abd0f232775f45feab79864e580d160b".to_owned()),
            sampled: Some("true".to_owned()),
            sample_rate: Some("0.25".to_owned()),
            transaction: Some("GET /users".to_owned()),
            release: Some("backend@1.2.3".to_owned()),
            environment: Some("production".to_owned()),
            user_segment: Some("vip".to_owned()),
            replay_id: None,
        }
    }

    #[test]
    fn baggage_round_trip() {
        let dsc = sample_dsc();
        let mut baggage = Baggage::new();
        dsc.apply_to_baggage(&mut baggage);

        assert_eq!(DynamicSamplingContext::from_baggage(&baggage), Some(dsc));
    }

    #[test]
    fn third_party_entries_survive_application() {
        let mut baggage = Baggage::parse("vendor=blob%3B1,sentry-sample_rate=0.9,sentry-custom=x");
        sample_dsc().apply_to_baggage(&mut baggage);

        let header = baggage.to_header();
        assert!(header.starts_with("vendor=blob%3B1,"));
        // the stale rate and the unknown sentry entry are gone
        assert!(!header.contains("0.9"));
        assert!(!header.contains("sentry-custom"));
        assert_eq!(
            baggage.get("sentry-sample_rate").as_deref(),
            Some("0.25")
        );
    }

    #[test]
    fn missing_trace_id_means_no_upstream_context() {
        let baggage = Baggage::parse("sentry-release=backend@1.2.3,vendor=blob");
        assert_eq!(DynamicSamplingContext::from_baggage(&baggage), None);
    }

    #[test]
    fn sample_rate_parses_as_number() {
        assert_eq!(sample_dsc().sample_rate_value(), Some(0.25));

        let mut dsc = sample_dsc();
        dsc.sample_rate = Some("bogus".to_owned());
        assert_eq!(dsc.sample_rate_value(), None);
    }

    #[test]
    fn envelope_header_serializes_under_trace_key() {
        let header = EnvelopeHeader { trace: sample_dsc() };
        let json = serde_json::to_value(&header).unwrap();

        assert_eq!(json["trace"]["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(json["trace"]["sampled"], "true");
        assert_eq!(json["trace"]["sample_rate"], "0.25");
        assert!(json["trace"].get("replay_id").is_none());
    }
}
