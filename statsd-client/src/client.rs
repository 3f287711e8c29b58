use std::{net::ToSocketAddrs, sync::Arc, time::Duration};

use statsd_common::Metric;
use thiserror::Error;
use tracing::debug;

use crate::{
    collector::{Collector, CollectorError, SyncCollector},
    transport::{Transport, TransportError, UdpTransport},
};

/// Errors that could occur while building a client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The collector or the transport was not provided.
    #[error("collector and transport must be provided")]
    MissingComponents,
}

/// Errors that could occur while closing a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The collector failed to flush its held metrics.
    #[error("failed to flush collector")]
    Flush(#[source] TransportError),

    /// The transport failed to close.
    #[error("failed to close transport")]
    Close(#[source] TransportError),
}

/// Builder for a [`Client`].
///
/// Both a collector and a transport must be provided. They are normally wired together, with the collector writing to
/// the same transport that the client closes:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use statsd_client::{ClientBuilder, SyncCollector, UdpTransport};
/// let transport = Arc::new(UdpTransport::connect("127.0.0.1:8125").expect("failed to connect transport"));
/// let collector = SyncCollector::new(Arc::clone(&transport));
///
/// let client = ClientBuilder::default()
///     .with_transport(transport)
///     .with_collector(collector)
///     .build()
///     .expect("failed to build client");
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    collector: Option<Box<dyn Collector>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Sets the collector that metrics are sent through.
    #[must_use]
    pub fn with_collector<C>(mut self, collector: C) -> Self
    where
        C: Collector + 'static,
    {
        self.collector = Some(Box::new(collector));
        self
    }

    /// Sets the transport that is closed along with the client.
    #[must_use]
    pub fn with_transport<T>(mut self, transport: Arc<T>) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(transport as Arc<dyn Transport>);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// If either the collector or the transport was not provided, an error is returned.
    pub fn build(self) -> Result<Client, BuildError> {
        match (self.collector, self.transport) {
            (Some(collector), Some(transport)) => Ok(Client { collector, transport }),
            _ => Err(BuildError::MissingComponents),
        }
    }
}

/// A statsd client.
///
/// Sending goes through the collector, and closing flushes the collector before closing the transport.
pub struct Client {
    collector: Box<dyn Collector>,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Creates a [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Creates a client that sends each batch immediately over UDP to the given address.
    ///
    /// # Errors
    ///
    /// If the transport cannot be connected, an error is returned.
    pub fn udp<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let transport = Arc::new(UdpTransport::connect(addr)?);
        let collector = SyncCollector::new(Arc::clone(&transport));

        Ok(Client { collector: Box::new(collector), transport })
    }

    /// Sends the metrics.
    ///
    /// # Errors
    ///
    /// If the collector fails to deliver the metrics, an error is returned.
    pub fn send(&self, metrics: &[Metric]) -> Result<(), CollectorError> {
        self.collector.add(metrics)
    }

    /// Flushes the collector and then closes the transport.
    ///
    /// # Errors
    ///
    /// If the collector fails to flush, an error is returned and the transport is left open. Otherwise, if the
    /// transport fails to close, that error is returned.
    pub fn close(&self) -> Result<(), ClientError> {
        self.collector.flush().map_err(ClientError::Flush)?;
        self.transport.close().map_err(ClientError::Close)?;
        debug!("Closed client.");
        Ok(())
    }

    /// Flushes the collector and then closes the transport, with a time budget.
    ///
    /// This currently behaves exactly like [`close`][Client::close]: the timeout is accepted but not enforced.
    ///
    /// # Errors
    ///
    /// See [`close`][Client::close].
    pub fn close_timeout(&self, timeout: Duration) -> Result<(), ClientError> {
        let _ = timeout;
        self.close()
    }
}
