use std::{
    num::{ParseFloatError, ParseIntError},
    string::FromUtf8Error,
};

use thiserror::Error;

/// Errors that could occur while constructing a metric.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The sample rate was outside of `[0, 1]`.
    #[error("sample rate {sample_rate} is not in the range [0, 1]")]
    SampleRateOutOfRange {
        /// The rejected sample rate.
        sample_rate: f64,
    },
}

/// Errors that could occur while decoding a packet.
///
/// A protocol error only ever concerns the single packet being decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The type token did not match any known metric type.
    #[error("unknown metric type '{token}'")]
    UnknownMetricType {
        /// The type token as it appeared in the packet.
        token: String,
    },

    /// The name was not valid UTF-8.
    #[error("metric name is not valid UTF-8")]
    InvalidName {
        /// The underlying conversion failure.
        #[source]
        source: FromUtf8Error,
    },

    /// The value was not a valid base-10 signed integer.
    #[error("invalid metric value '{value}'")]
    InvalidValue {
        /// The value as it appeared in the packet.
        value: String,

        /// The underlying parse failure.
        #[source]
        source: ParseIntError,
    },

    /// The sample rate was not a valid floating-point literal.
    #[error("invalid sample rate '{sample_rate}'")]
    InvalidSampleRate {
        /// The sample rate as it appeared in the packet.
        sample_rate: String,

        /// The underlying parse failure.
        #[source]
        source: ParseFloatError,
    },

    /// The decoded fields did not form a valid metric.
    #[error("invalid metric")]
    InvalidMetric(#[from] ValidationError),
}
