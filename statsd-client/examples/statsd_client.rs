use std::{thread, time::Duration};

use statsd_client::Client;
use statsd_common::{Counter, Metric};
use tracing::info;

const RUN_TIME_SECS: u64 = 30;
const METRICS_PER_SEC: usize = 500;

fn main() {
    tracing_subscriber::fmt::init();

    let client = Client::udp("127.0.0.1:8125").expect("failed to connect client");

    info!("Sending {} metrics per second for {} seconds.", METRICS_PER_SEC, RUN_TIME_SECS);

    let batch = vec![Metric::from(Counter::new("foo", 1)); METRICS_PER_SEC];
    for _ in 0..RUN_TIME_SECS {
        client.send(&batch).expect("failed to send metrics");
        thread::sleep(Duration::from_secs(1));
    }

    info!("Shutting down.");
    client.close().expect("failed to close client");
}
