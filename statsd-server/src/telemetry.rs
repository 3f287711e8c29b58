use metrics::{counter, Counter};

/// Listener telemetry.
///
/// Handles are registered against whichever recorder is current when the listener starts, and are then shared by all
/// of its workers.
#[derive(Clone)]
pub struct Telemetry {
    packets_received: Counter,
    packets_dropped_decode: Counter,
    packets_dropped_receive: Counter,
    packets_dropped_processor: Counter,
    metrics_processed: Counter,
    poll_errors: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance for a listener on the given port.
    pub fn new(port: u16) -> Self {
        let port = port.to_string();
        let dropped = |reason: &'static str| {
            counter!("statsd.server.packets_dropped", "listener_port" => port.clone(), "reason" => reason)
        };

        Self {
            packets_received: counter!("statsd.server.packets_received", "listener_port" => port.clone()),
            packets_dropped_decode: dropped("decode"),
            packets_dropped_receive: dropped("receive"),
            packets_dropped_processor: dropped("processor"),
            metrics_processed: counter!("statsd.server.metrics_processed", "listener_port" => port.clone()),
            poll_errors: counter!("statsd.server.poll_errors", "listener_port" => port),
        }
    }

    /// Tracks a datagram read from a socket.
    pub fn track_packet_received(&self) {
        self.packets_received.increment(1);
    }

    /// Tracks a datagram dropped because it failed to decode.
    pub fn track_decode_failed(&self) {
        self.packets_dropped_decode.increment(1);
    }

    /// Tracks a failed read from a socket.
    pub fn track_receive_failed(&self) {
        self.packets_dropped_receive.increment(1);
    }

    /// Tracks a metric dropped because the processor panicked while handling it.
    pub fn track_processor_failed(&self) {
        self.packets_dropped_processor.increment(1);
    }

    /// Tracks a metric the processor handled without panicking.
    pub fn track_metric_processed(&self) {
        self.metrics_processed.increment(1);
    }

    /// Tracks a failed poll of a worker's event loop.
    pub fn track_poll_failed(&self) {
        self.poll_errors.increment(1);
    }
}
