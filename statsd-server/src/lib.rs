//! A UDP listener that decodes statsd metrics and hands them to a processor.
//!
//! # Usage
//!
//! ```no_run
//! # use statsd_common::Metric;
//! # use statsd_server::Listener;
//! let listener = Listener::builder()
//!     .with_processor(|metric: Metric| println!("{metric}"))
//!     .with_port(8125)
//!     .with_threads(4)
//!     .with_reuse_port(true)
//!     .build()
//!     .expect("failed to build listener");
//!
//! listener.start().expect("failed to start listener");
//! // ...
//! listener.shutdown();
//! ```
//!
//! # Processing
//!
//! Each datagram is decoded as a single metric. Datagrams that fail to decode are logged and dropped, and the listener
//! carries on. Decoded metrics are passed to the [`MetricProcessor`] on the worker thread that received them. A panic
//! in the processor drops that metric only; the worker keeps serving its socket.
//!
//! # Telemetry
//!
//! The listener reports on itself through the [`metrics`] facade, using whichever recorder is installed when
//! [`Listener::start`] is called:
//!
//! - `statsd.server.packets_received`: datagrams read from a socket
//! - `statsd.server.packets_dropped`: datagrams dropped, labelled with `reason` (`decode`, `receive` or `processor`)
//! - `statsd.server.metrics_processed`: metrics handled by the processor
//! - `statsd.server.poll_errors`: failed polls of a worker's event loop
//!
//! All of them carry a `listener_port` label.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod listener;
pub use self::listener::{BuildError, Listener, ListenerBuilder, ListenerError};

mod processor;
pub use self::processor::MetricProcessor;

mod telemetry;
