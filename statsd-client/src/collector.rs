use std::sync::Arc;

use parking_lot::Mutex;
use statsd_common::Metric;
use thiserror::Error;
use tracing::trace;

use crate::transport::{Transport, TransportError};

/// Errors that could occur while adding metrics to a collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The metrics could not be handed off to the transport.
    #[error("could not deliver metrics to transport")]
    Delivery(#[source] TransportError),
}

/// Buffering policy in front of a [`Transport`].
#[cfg_attr(test, mockall::automock)]
pub trait Collector: Send + Sync {
    /// Adds metrics for eventual delivery.
    ///
    /// # Errors
    ///
    /// If the collector delivers the metrics as part of this call, and delivery fails, an error is returned.
    fn add(&self, metrics: &[Metric]) -> Result<(), CollectorError>;

    /// Writes any held metrics to the transport.
    ///
    /// Flushing when no metrics are held does nothing.
    ///
    /// # Errors
    ///
    /// If the transport fails to write the held metrics, an error is returned.
    fn flush(&self) -> Result<(), TransportError>;
}

/// A collector that hands every batch to the transport immediately.
///
/// Calls to [`add`][Collector::add] are serialized: the batch is placed in a single-slot holder, flushed to the
/// transport, and the holder is cleared whether or not the write succeeded. The caller is blocked for the duration of
/// the write, and there is never more than one batch in flight per collector.
pub struct SyncCollector<T: ?Sized> {
    pending: Mutex<Vec<Metric>>,
    transport: Arc<T>,
}

impl<T: Transport + ?Sized> SyncCollector<T> {
    /// Creates a `SyncCollector` that writes to the given transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self { pending: Mutex::new(Vec::new()), transport }
    }

    fn flush_pending(&self, pending: &mut Vec<Metric>) -> Result<(), TransportError> {
        if pending.is_empty() {
            return Ok(());
        }

        trace!(metrics = pending.len(), "Flushing metrics to transport.");
        let result = self.transport.write(pending);
        pending.clear();
        result
    }
}

impl<T: Transport + ?Sized> Collector for SyncCollector<T> {
    fn add(&self, metrics: &[Metric]) -> Result<(), CollectorError> {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(metrics);

        let result = self.flush_pending(&mut pending);
        pending.clear();
        result.map_err(CollectorError::Delivery)
    }

    fn flush(&self) -> Result<(), TransportError> {
        let mut pending = self.pending.lock();
        self.flush_pending(&mut pending)
    }
}
