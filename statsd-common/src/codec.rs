//! Line codec.
//!
//! Every datagram carries exactly one metric, in one of the following forms:
//!
//! ```text
//! <name>:<value>|c[|@<sample rate>]
//! <name>:[+|-]<value>|g
//! <name>:<value>|ms[|@<sample rate>]
//! ```
//!
//! The sample rate is only written when it is below 1.0. A gauge value with an explicit sign is a delta, while an
//! unsigned gauge value is an absolute value.
//!
//! Two gauges cannot survive a round trip through the wire format unchanged: an update of zero is written without a
//! sign and so decodes as a set, and a set of a negative value carries a sign and so decodes as an update.

use crate::{
    error::ProtocolError,
    metric::{Counter, Gauge, GaugeKind, Metric, MetricType, Timing, DEFAULT_SAMPLE_RATE},
};

/// Encodes the metric into a new buffer.
pub fn encode(metric: &Metric) -> Vec<u8> {
    let mut buf = Vec::with_capacity(metric.name().len() + 24);
    encode_into(metric, &mut buf);
    buf
}

/// Encodes the metric, appending it to `buf`.
pub fn encode_into(metric: &Metric, buf: &mut Vec<u8>) {
    match metric {
        Metric::Counter(counter) => write_line(
            buf,
            counter.name(),
            counter.value(),
            false,
            MetricType::Counter,
            counter.sample_rate(),
        ),
        Metric::Gauge(gauge) => write_line(
            buf,
            gauge.name(),
            gauge.value(),
            gauge.kind() == GaugeKind::Update && gauge.value() > 0,
            MetricType::Gauge,
            DEFAULT_SAMPLE_RATE,
        ),
        Metric::Timing(timing) => write_line(
            buf,
            timing.name(),
            timing.value(),
            false,
            MetricType::Timing,
            timing.sample_rate(),
        ),
    }
}

fn write_line(
    buf: &mut Vec<u8>,
    name: &str,
    value: i64,
    explicit_plus: bool,
    metric_type: MetricType,
    sample_rate: f64,
) {
    buf.extend_from_slice(name.as_bytes());
    buf.push(b':');

    // Negative values already carry their own sign.
    if explicit_plus {
        buf.push(b'+');
    }

    let mut int_writer = itoa::Buffer::new();
    buf.extend_from_slice(int_writer.format(value).as_bytes());

    buf.push(b'|');
    buf.extend_from_slice(metric_type.as_str().as_bytes());

    // A sample rate of 1.0 is implied when absent.
    if sample_rate < DEFAULT_SAMPLE_RATE {
        let mut float_writer = ryu::Buffer::new();
        buf.extend_from_slice(b"|@");
        buf.extend_from_slice(float_writer.format(sample_rate).as_bytes());
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Segment {
    Name,
    Value,
    Type,
    Sample,
}

/// Accumulates the raw bytes of the four segments of a line as it is scanned.
#[derive(Default)]
struct Segments {
    name: Vec<u8>,
    value: Vec<u8>,
    token: Vec<u8>,
    sample_rate: Vec<u8>,
}

impl Segments {
    fn get_mut(&mut self, segment: Segment) -> &mut Vec<u8> {
        match segment {
            Segment::Name => &mut self.name,
            Segment::Value => &mut self.value,
            Segment::Type => &mut self.token,
            Segment::Sample => &mut self.sample_rate,
        }
    }
}

/// Decodes a single metric from a packet.
///
/// The packet is scanned once from left to right. `:` starts the value, the first `|` after the value starts the type
/// token, and any other `|` starts the sample rate. `@` is dropped, and every other byte is appended to the current
/// segment. The name must be valid UTF-8.
///
/// # Errors
///
/// If the name is not valid UTF-8, the type token is not recognized, or the value or sample rate cannot be parsed, an
/// error is returned.
pub fn decode(packet: &[u8]) -> Result<Metric, ProtocolError> {
    let mut segments = Segments::default();
    let mut segment = Segment::Name;

    for &byte in packet {
        match byte {
            b':' => segment = Segment::Value,
            b'|' => {
                segment = if segment == Segment::Value { Segment::Type } else { Segment::Sample };
            }
            b'@' => {}
            _ => segments.get_mut(segment).push(byte),
        }
    }

    let Segments { name, value, token, sample_rate } = segments;
    let token = lossy(&token);
    let Some(metric_type) = MetricType::from_token(&token) else {
        return Err(ProtocolError::UnknownMetricType { token });
    };

    let name = String::from_utf8(name).map_err(|source| ProtocolError::InvalidName { source })?;
    let value = lossy(&value);
    match metric_type {
        MetricType::Counter => {
            let value = parse_value(value)?;
            let sample_rate = parse_sample_rate(lossy(&sample_rate))?;
            Ok(Counter::with_sample_rate(name, value, sample_rate)?.into())
        }
        MetricType::Gauge => {
            let kind = if value.starts_with(|c| c == '+' || c == '-') {
                GaugeKind::Update
            } else {
                GaugeKind::Set
            };
            let value = parse_value(value)?;
            Ok(Gauge::with_kind(name, value, kind).into())
        }
        MetricType::Timing => {
            let value = parse_value(value)?;
            let sample_rate = parse_sample_rate(lossy(&sample_rate))?;
            Ok(Timing::with_sample_rate(name, value, sample_rate)?.into())
        }
    }
}

// Numeric segments and type tokens are ASCII when valid, so lossy conversion only affects what an error reports.
fn lossy(segment: &[u8]) -> String {
    String::from_utf8_lossy(segment).into_owned()
}

fn parse_value(value: String) -> Result<i64, ProtocolError> {
    value.parse().map_err(|source| ProtocolError::InvalidValue { value, source })
}

fn parse_sample_rate(sample_rate: String) -> Result<f64, ProtocolError> {
    if sample_rate.is_empty() {
        return Ok(DEFAULT_SAMPLE_RATE);
    }

    sample_rate.parse().map_err(|source| ProtocolError::InvalidSampleRate { sample_rate, source })
}
