//! Metric types and the line codec shared by [`statsd-client`][client] and [`statsd-server`][server].
//!
//! A [`Metric`] is one observation: a [`Counter`] increment, a [`Gauge`] value or delta, or a [`Timing`] duration in
//! milliseconds. Metrics are immutable once built, and are sent one per datagram using the ASCII line format handled by
//! the [`codec`] module:
//!
//! ```
//! # use statsd_common::{codec, Counter, Metric};
//! let metric = Metric::from(Counter::with_sample_rate("api.requests", 1, 0.5).expect("valid sample rate"));
//!
//! let packet = codec::encode(&metric);
//! assert_eq!(packet, b"api.requests:1|c|@0.5");
//!
//! let decoded = codec::decode(&packet).expect("valid packet");
//! assert_eq!(decoded, metric);
//! ```
//!
//! [client]: https://docs.rs/statsd-client
//! [server]: https://docs.rs/statsd-server

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod codec;

mod error;
pub use self::error::{ProtocolError, ValidationError};

mod metric;
pub use self::metric::{Counter, Gauge, GaugeKind, Metric, MetricType, Timing, DEFAULT_SAMPLE_RATE};
