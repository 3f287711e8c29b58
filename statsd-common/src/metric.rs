use std::fmt;

use crate::{codec, error::ValidationError};

/// The implied sample rate when none is present on the wire.
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

fn validate_sample_rate(sample_rate: f64) -> Result<f64, ValidationError> {
    // NaN fails the range check as well.
    if (0.0..=1.0).contains(&sample_rate) {
        Ok(sample_rate)
    } else {
        Err(ValidationError::SampleRateOutOfRange { sample_rate })
    }
}

/// Metric type.
///
/// Each type maps to the token that trails the value in the line protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// A counter, sent as `c`.
    Counter,

    /// A gauge, sent as `g`.
    Gauge,

    /// A timing, in milliseconds, sent as `ms`.
    Timing,
}

impl MetricType {
    /// Returns the wire token for this metric type.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timing => "ms",
        }
    }

    /// Looks up the metric type for the given wire token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "c" => Some(MetricType::Counter),
            "g" => Some(MetricType::Gauge),
            "ms" => Some(MetricType::Timing),
            _ => None,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a gauge value should be applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GaugeKind {
    /// The value is the new absolute value of the gauge.
    #[default]
    Set,

    /// The value is a signed delta to apply to the current value of the gauge.
    Update,
}

/// A counter.
#[derive(Clone, Debug, PartialEq)]
pub struct Counter {
    name: String,
    value: i64,
    sample_rate: f64,
}

impl Counter {
    /// Creates a `Counter` with a sample rate of 1.0.
    pub fn new<N: Into<String>>(name: N, value: i64) -> Self {
        Self { name: name.into(), value, sample_rate: DEFAULT_SAMPLE_RATE }
    }

    /// Creates a `Counter` with the given sample rate.
    ///
    /// # Errors
    ///
    /// If the sample rate is not within `[0, 1]`, an error is returned.
    pub fn with_sample_rate<N: Into<String>>(
        name: N,
        value: i64,
        sample_rate: f64,
    ) -> Result<Self, ValidationError> {
        let sample_rate = validate_sample_rate(sample_rate)?;
        Ok(Self { name: name.into(), value, sample_rate })
    }

    /// Returns the name of the counter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of the counter.
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// Returns the sample rate of the counter.
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

/// A gauge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gauge {
    name: String,
    value: i64,
    kind: GaugeKind,
}

impl Gauge {
    /// Creates a `Gauge` that sets the absolute value.
    pub fn new<N: Into<String>>(name: N, value: i64) -> Self {
        Self::with_kind(name, value, GaugeKind::Set)
    }

    /// Creates a `Gauge` of the given kind.
    pub fn with_kind<N: Into<String>>(name: N, value: i64, kind: GaugeKind) -> Self {
        Self { name: name.into(), value, kind }
    }

    /// Creates a `Gauge` that sets the absolute value.
    pub fn set<N: Into<String>>(name: N, value: i64) -> Self {
        Self::with_kind(name, value, GaugeKind::Set)
    }

    /// Creates a `Gauge` that applies `delta` to the current value.
    pub fn update<N: Into<String>>(name: N, delta: i64) -> Self {
        Self::with_kind(name, delta, GaugeKind::Update)
    }

    /// Returns the name of the gauge.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of the gauge.
    ///
    /// For [`GaugeKind::Update`] gauges, this is the delta.
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// Returns the kind of the gauge.
    pub const fn kind(&self) -> GaugeKind {
        self.kind
    }
}

/// A timing, in milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Timing {
    name: String,
    value: i64,
    sample_rate: f64,
}

impl Timing {
    /// Creates a `Timing` with a sample rate of 1.0.
    pub fn new<N: Into<String>>(name: N, value: i64) -> Self {
        Self { name: name.into(), value, sample_rate: DEFAULT_SAMPLE_RATE }
    }

    /// Creates a `Timing` with the given sample rate.
    ///
    /// # Errors
    ///
    /// If the sample rate is not within `[0, 1]`, an error is returned.
    pub fn with_sample_rate<N: Into<String>>(
        name: N,
        value: i64,
        sample_rate: f64,
    ) -> Result<Self, ValidationError> {
        let sample_rate = validate_sample_rate(sample_rate)?;
        Ok(Self { name: name.into(), value, sample_rate })
    }

    /// Returns the name of the timing.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the duration, in milliseconds.
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// Returns the sample rate of the timing.
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

/// A single metric observation.
#[derive(Clone, Debug, PartialEq)]
pub enum Metric {
    /// A counter.
    Counter(Counter),

    /// A gauge.
    Gauge(Gauge),

    /// A timing.
    Timing(Timing),
}

impl Metric {
    /// Returns the name of the metric.
    pub fn name(&self) -> &str {
        match self {
            Metric::Counter(c) => c.name(),
            Metric::Gauge(g) => g.name(),
            Metric::Timing(t) => t.name(),
        }
    }

    /// Returns the value of the metric.
    pub const fn value(&self) -> i64 {
        match self {
            Metric::Counter(c) => c.value(),
            Metric::Gauge(g) => g.value(),
            Metric::Timing(t) => t.value(),
        }
    }

    /// Returns the type of the metric.
    pub const fn metric_type(&self) -> MetricType {
        match self {
            Metric::Counter(_) => MetricType::Counter,
            Metric::Gauge(_) => MetricType::Gauge,
            Metric::Timing(_) => MetricType::Timing,
        }
    }

    /// Returns the sample rate of the metric, if the metric type carries one.
    pub const fn sample_rate(&self) -> Option<f64> {
        match self {
            Metric::Counter(c) => Some(c.sample_rate()),
            Metric::Gauge(_) => None,
            Metric::Timing(t) => Some(t.sample_rate()),
        }
    }
}

impl From<Counter> for Metric {
    fn from(counter: Counter) -> Self {
        Metric::Counter(counter)
    }
}

impl From<Gauge> for Metric {
    fn from(gauge: Gauge) -> Self {
        Metric::Gauge(gauge)
    }
}

impl From<Timing> for Metric {
    fn from(timing: Timing) -> Self {
        Metric::Timing(timing)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Vec::new();
        codec::encode_into(self, &mut buf);

        // Names are `String`s and everything else the encoder writes is ASCII, so the line is valid UTF-8.
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_sample_rate_bounds() {
        assert!(Counter::with_sample_rate("foo", 1, 0.0).is_ok());
        assert!(Counter::with_sample_rate("foo", 1, 1.0).is_ok());
        assert!(Counter::with_sample_rate("foo", 1, 0.5).is_ok());

        for rate in [-1.0, 1.1, f64::NAN, f64::INFINITY] {
            let err = Counter::with_sample_rate("foo", 1, rate).unwrap_err();
            assert!(matches!(err, ValidationError::SampleRateOutOfRange { .. }));
        }
    }

    #[test]
    fn timing_sample_rate_bounds() {
        assert!(Timing::with_sample_rate("foo", 1, 0.0).is_ok());
        assert!(Timing::with_sample_rate("foo", 1, 1.0).is_ok());

        assert!(Timing::with_sample_rate("foo", 1, -1.0).is_err());
        assert!(Timing::with_sample_rate("foo", 1, 1.1).is_err());
    }

    #[test]
    fn defaults() {
        assert_eq!(Counter::new("foo", 1).sample_rate(), DEFAULT_SAMPLE_RATE);
        assert_eq!(Timing::new("foo", 1).sample_rate(), DEFAULT_SAMPLE_RATE);
        assert_eq!(Gauge::new("foo", 1).kind(), GaugeKind::Set);
        assert_eq!(Gauge::update("foo", -3).kind(), GaugeKind::Update);
    }

    #[test]
    fn metric_accessors() {
        let metric = Metric::from(Timing::new("request.latency", 250));
        assert_eq!(metric.name(), "request.latency");
        assert_eq!(metric.value(), 250);
        assert_eq!(metric.metric_type(), MetricType::Timing);
        assert_eq!(metric.sample_rate(), Some(1.0));

        let metric = Metric::from(Gauge::set("queue.depth", 12));
        assert_eq!(metric.metric_type(), MetricType::Gauge);
        assert_eq!(metric.sample_rate(), None);
    }

    #[test]
    fn metric_type_tokens() {
        for metric_type in [MetricType::Counter, MetricType::Gauge, MetricType::Timing] {
            assert_eq!(MetricType::from_token(metric_type.as_str()), Some(metric_type));
        }
        assert_eq!(MetricType::from_token("h"), None);
    }

    #[test]
    fn display_matches_wire_format() {
        let metric = Metric::from(Counter::with_sample_rate("foo", 3, 0.5).unwrap());
        assert_eq!(metric.to_string(), "foo:3|c|@0.5");
    }
}
