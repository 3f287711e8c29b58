use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use statsd_common::Metric;
use statsd_server::Listener;
use tracing::info;

fn main() {
    tracing_subscriber::fmt::init();

    let received = Arc::new(AtomicUsize::new(0));
    let processor_received = Arc::clone(&received);

    let listener = Listener::builder()
        .with_processor(move |_: Metric| {
            processor_received.fetch_add(1, Ordering::Relaxed);
        })
        .with_port(8125)
        .with_threads(4)
        .with_reuse_port(true)
        .build()
        .expect("failed to build listener");
    listener.start().expect("failed to start listener");

    for _ in 0..30 {
        thread::sleep(Duration::from_secs(1));
        info!(received = received.load(Ordering::Relaxed), "Metrics received so far.");
    }

    listener.shutdown();
}
