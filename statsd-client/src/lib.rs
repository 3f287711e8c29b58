//! A client for sending metrics to a statsd server over UDP.
//!
//! The client is composed of two parts: a [`Transport`], which writes encoded metrics to the network, and a
//! [`Collector`], which decides when metrics are handed to the transport.
//!
//! # Usage
//!
//! For the common case, [`Client::udp`] wires a [`UdpTransport`] to a [`SyncCollector`]:
//!
//! ```no_run
//! # use statsd_client::Client;
//! # use statsd_common::{Counter, Gauge, Timing};
//! let client = Client::udp("127.0.0.1:8125").expect("failed to connect");
//!
//! client
//!     .send(&[
//!         Counter::new("api.requests", 1).into(),
//!         Gauge::update("workers.busy", -1).into(),
//!         Timing::new("db.query", 12).into(),
//!     ])
//!     .expect("failed to send metrics");
//!
//! client.close().expect("failed to close client");
//! ```
//!
//! Custom transports and collectors can be supplied through [`ClientBuilder`].
//!
//! # Delivery
//!
//! Metrics are sent one per datagram, with no acknowledgement and no ordering guarantees. A successful send only means
//! the datagrams were handed to the operating system.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod client;
pub use self::client::{BuildError, Client, ClientBuilder, ClientError};

mod collector;
pub use self::collector::{Collector, CollectorError, SyncCollector};

mod transport;
pub use self::transport::{Transport, TransportError, UdpTransport};
