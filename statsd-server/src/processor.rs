use statsd_common::Metric;

/// Consumes decoded metrics.
///
/// The processor is called once for every packet that decodes successfully. When the listener runs more than one
/// socket, it is called concurrently from each worker thread, and no ordering holds between metrics received on
/// different sockets.
pub trait MetricProcessor: Send + Sync + 'static {
    /// Processes a single metric.
    fn process(&self, metric: Metric);
}

impl<F> MetricProcessor for F
where
    F: Fn(Metric) + Send + Sync + 'static,
{
    fn process(&self, metric: Metric) {
        (self)(metric);
    }
}
