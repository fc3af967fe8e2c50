use crate::config::Config;
use crate::sdk_warn;
use crate::trace::id_generator::uniform_draw;
use std::borrow::Cow;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Data passed to a [`TracesSampler`] callback, which forms the basis for
/// whatever decision it might make.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct SamplingContext {
    /// Name of the transaction the decision is being made for.
    pub transaction_name: Cow<'static, str>,
    /// Operation label of the root span.
    pub op: Cow<'static, str>,
    /// The decision inherited from an upstream service, if the trace was
    /// continued. When this is set the callback is not consulted at all.
    pub parent_sampled: Option<bool>,
}

impl Default for SamplingContext {
    fn default() -> Self {
        SamplingContext {
            transaction_name: Cow::Borrowed(""),
            op: Cow::Borrowed(""),
            parent_sampled: None,
        }
    }
}

/// The outcome of a sampling decision.
///
/// `sample_rate` records the rate that produced the decision so it can be
/// propagated in the dynamic sampling context; it is `None` when the decision
/// was inherited from a parent whose rate is unknown.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingResult {
    /// Whether the trace is recorded and emitted.
    pub sampled: bool,
    /// The rate in effect when the decision was made.
    pub sample_rate: Option<f64>,
}

/// User-supplied callback computing a sample rate for a new trace.
///
/// The returned value is interpreted as a probability in `[0, 1]`. Values
/// outside that range, non-finite values, and panics all degrade to "do not
/// sample".
#[derive(Clone)]
pub struct TracesSampler(Arc<dyn Fn(&SamplingContext) -> f64 + Send + Sync>);

impl TracesSampler {
    /// Wrap a sampling callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&SamplingContext) -> f64 + Send + Sync + 'static,
    {
        TracesSampler(Arc::new(f))
    }

    pub(crate) fn call(&self, ctx: &SamplingContext) -> Option<f64> {
        catch_unwind(AssertUnwindSafe(|| (self.0)(ctx))).ok()
    }
}

impl<F> From<F> for TracesSampler
where
    F: Fn(&SamplingContext) -> f64 + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        TracesSampler::new(f)
    }
}

impl fmt::Debug for TracesSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TracesSampler {{ .. }}")
    }
}

/// Sampling strategies for new traces.
///
/// The strategies are tagged variants behind a single decision point,
/// [`Sampler::should_sample`]. An inherited parent decision always wins over
/// the configured strategy so that one trace gets exactly one decision,
/// honored by every span and every downstream service.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Sampler {
    /// Always sample the trace.
    AlwaysOn,
    /// Never sample the trace.
    AlwaysOff,
    /// Sample a given fraction of traces. The rate is clamped into `[0, 1]`;
    /// a rate of exactly 0 never samples and a rate of exactly 1 always does.
    Rate(f64),
    /// Delegate the rate to a user-supplied callback.
    Custom(TracesSampler),
}

impl Sampler {
    /// Builds the effective sampler for a configuration: a callback wins over
    /// a static rate; with neither configured, nothing is sampled.
    pub fn from_config(config: &Config) -> Sampler {
        if let Some(sampler) = &config.traces_sampler {
            Sampler::Custom(sampler.clone())
        } else if let Some(rate) = config.traces_sample_rate {
            Sampler::Rate(rate)
        } else {
            Sampler::AlwaysOff
        }
    }

    /// Returns the sampling decision for a trace to be created.
    ///
    /// A `parent_sampled` decision is inherited verbatim; only root traces
    /// without an upstream decision consult the configured strategy.
    pub fn should_sample(
        &self,
        parent_sampled: Option<bool>,
        ctx: &SamplingContext,
    ) -> SamplingResult {
        if let Some(sampled) = parent_sampled {
            return SamplingResult {
                sampled,
                sample_rate: None,
            };
        }

        match self {
            Sampler::AlwaysOn => SamplingResult {
                sampled: true,
                sample_rate: Some(1.0),
            },
            Sampler::AlwaysOff => SamplingResult {
                sampled: false,
                sample_rate: Some(0.0),
            },
            Sampler::Rate(rate) => draw_against(rate.clamp(0.0, 1.0)),
            Sampler::Custom(sampler) => match sampler.call(ctx) {
                Some(rate) if rate.is_finite() && (0.0..=1.0).contains(&rate) => {
                    draw_against(rate)
                }
                Some(rate) => {
                    sdk_warn!(
                        name: "Sampler.InvalidSampleRate",
                        message = "traces sampler returned a rate outside [0, 1], not sampling",
                        rate = rate
                    );
                    SamplingResult {
                        sampled: false,
                        sample_rate: Some(0.0),
                    }
                }
                None => {
                    sdk_warn!(
                        name: "Sampler.CallbackPanicked",
                        message = "traces sampler panicked, not sampling"
                    );
                    SamplingResult {
                        sampled: false,
                        sample_rate: Some(0.0),
                    }
                }
            },
        }
    }
}

/// One uniform draw in `[0, 1)` against `rate`.
///
/// Uses `<`, never `<=`, so that a rate of exactly 0 can never sample and a
/// rate of exactly 1 always does.
fn draw_against(rate: f64) -> SamplingResult {
    SamplingResult {
        sampled: uniform_draw() < rate,
        sample_rate: Some(rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SamplingContext {
        SamplingContext {
            transaction_name: "GET /checkout".into(),
            op: "http.server".into(),
            parent_sampled: None,
        }
    }

    #[test]
    fn rate_zero_never_samples() {
        let sampler = Sampler::Rate(0.0);
        for _ in 0..10_000 {
            assert!(!sampler.should_sample(None, &ctx()).sampled);
        }
    }

    #[test]
    fn rate_one_always_samples() {
        let sampler = Sampler::Rate(1.0);
        for _ in 0..10_000 {
            assert!(sampler.should_sample(None, &ctx()).sampled);
        }
    }

    #[test]
    fn rate_is_approximately_honored() {
        let total = 10_000;
        let expectation = 0.5;
        let sampler = Sampler::Rate(expectation);

        let sampled = (0..total)
            .filter(|_| sampler.should_sample(None, &ctx()).sampled)
            .count();
        let got = sampled as f64 / total as f64;

        // See https://en.wikipedia.org/wiki/Binomial_proportion_confidence_interval
        let z = 4.75342; // This should succeed 99.9999% of the time
        let tolerance = z * (got * (1.0 - got) / total as f64).sqrt();
        assert!(
            (got - expectation).abs() <= tolerance,
            "got {got}, expected {expectation} (w/tolerance {tolerance})"
        );
    }

    #[rustfmt::skip]
    fn parent_decision_data() -> Vec<(&'static str, Sampler, Option<bool>, bool)> {
        vec![
            ("sampled_parent_beats_always_off", Sampler::AlwaysOff, Some(true), true),
            ("unsampled_parent_beats_always_on", Sampler::AlwaysOn, Some(false), false),
            ("sampled_parent_beats_rate_zero", Sampler::Rate(0.0), Some(true), true),
            ("unsampled_parent_beats_rate_one", Sampler::Rate(1.0), Some(false), false),
        ]
    }

    #[test]
    fn parent_decision_is_inherited_verbatim() {
        for (name, sampler, parent, expected) in parent_decision_data() {
            let result = sampler.should_sample(parent, &ctx());
            assert_eq!(result.sampled, expected, "{name}");
            assert_eq!(result.sample_rate, None, "{name}");
        }
    }

    #[test]
    fn custom_sampler_is_consulted_for_roots() {
        let sampler = Sampler::Custom(TracesSampler::new(|ctx| {
            if ctx.op == "http.server" {
                1.0
            } else {
                0.0
            }
        }));

        let result = sampler.should_sample(None, &ctx());
        assert!(result.sampled);
        assert_eq!(result.sample_rate, Some(1.0));
    }

    #[rustfmt::skip]
    fn invalid_callback_data() -> Vec<(&'static str, TracesSampler)> {
        vec![
            ("negative", TracesSampler::new(|_| -0.5)),
            ("above_one", TracesSampler::new(|_| 1.5)),
            ("nan", TracesSampler::new(|_| f64::NAN)),
            ("infinite", TracesSampler::new(|_| f64::INFINITY)),
            ("panicking", TracesSampler::new(|_| panic!("boom"))),
        ]
    }

    #[test]
    fn invalid_callback_results_never_sample() {
        for (name, callback) in invalid_callback_data() {
            let sampler = Sampler::Custom(callback);
            let result = sampler.should_sample(None, &ctx());
            assert!(!result.sampled, "{name}");
            assert_eq!(result.sample_rate, Some(0.0), "{name}");
        }
    }

    #[test]
    fn unconfigured_sampler_never_samples() {
        let config = Config::default();
        let sampler = Sampler::from_config(&config);
        assert!(!sampler.should_sample(None, &ctx()).sampled);
    }

    #[test]
    fn callback_wins_over_static_rate() {
        let mut config = Config::default();
        config.traces_sample_rate = Some(0.0);
        config.traces_sampler = Some(TracesSampler::new(|_| 1.0));

        let sampler = Sampler::from_config(&config);
        assert!(sampler.should_sample(None, &ctx()).sampled);
    }
}
