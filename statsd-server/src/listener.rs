use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use mio::{net::UdpSocket, Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use statsd_common::codec;
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::{processor::MetricProcessor, telemetry::Telemetry};

const DEFAULT_PORT: u16 = 8125;
const DEFAULT_RECEIVE_BUFFER_LEN: usize = 65_536;

const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

const WAKER: Token = Token(0);
const SOCKET: Token = Token(1);

/// Errors that could occur while building a listener.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No processor was provided.
    #[error("a processor must be provided")]
    MissingProcessor,
}

/// Errors that could occur while starting a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// A socket could not be bound.
    #[error("failed to bind socket to {addr}")]
    Bind {
        /// The address the socket was being bound to.
        addr: SocketAddr,

        /// The underlying bind failure.
        #[source]
        source: io::Error,
    },

    /// The event loop or worker thread for a socket could not be created.
    #[error("failed to start worker: {0}")]
    Io(#[from] io::Error),
}

/// Builder for a [`Listener`].
pub struct ListenerBuilder {
    processor: Option<Arc<dyn MetricProcessor>>,
    threads: usize,
    port: u16,
    reuse_port: bool,
    bind_ip: IpAddr,
    receive_buffer_len: usize,
}

impl ListenerBuilder {
    /// Sets the processor that decoded metrics are handed to.
    ///
    /// This is required.
    #[must_use]
    pub fn with_processor<P>(mut self, processor: P) -> Self
    where
        P: MetricProcessor,
    {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// Sets the number of worker threads.
    ///
    /// With port reuse enabled, one socket is bound per worker thread. Without it, a single socket is bound no matter
    /// how many threads are requested.
    ///
    /// Defaults to the available parallelism of the host. Zero selects the default.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the port to listen on.
    ///
    /// Defaults to 8125. Zero selects the default.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets whether or not to bind one socket per worker thread to the same port.
    ///
    /// This relies on `SO_REUSEPORT`, which lets the kernel spread incoming datagrams over all of the sockets.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    /// Sets the IP address to listen on.
    ///
    /// Defaults to `0.0.0.0`.
    #[must_use]
    pub fn with_bind_ip<A>(mut self, ip: A) -> Self
    where
        A: Into<IpAddr>,
    {
        self.bind_ip = ip.into();
        self
    }

    /// Sets the size of the per-socket receive buffer.
    ///
    /// Datagrams longer than this are truncated, and will almost certainly fail to decode.
    ///
    /// Defaults to 65,536 bytes.
    #[must_use]
    pub fn with_receive_buffer_len(mut self, len: usize) -> Self {
        self.receive_buffer_len = len;
        self
    }

    /// Builds the listener.
    ///
    /// The listener is not started.
    ///
    /// # Errors
    ///
    /// If no processor was provided, an error is returned.
    pub fn build(self) -> Result<Listener, BuildError> {
        let processor = self.processor.ok_or(BuildError::MissingProcessor)?;

        let threads = if self.threads == 0 {
            thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            self.threads
        };
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };

        let config = ListenerConfiguration {
            addr: SocketAddr::new(self.bind_ip, port),
            threads,
            reuse_port: self.reuse_port,
            receive_buffer_len: self.receive_buffer_len.max(1),
        };

        Ok(Listener { config, processor, session: Mutex::new(None) })
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        ListenerBuilder {
            processor: None,
            threads: 0,
            port: DEFAULT_PORT,
            reuse_port: false,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            receive_buffer_len: DEFAULT_RECEIVE_BUFFER_LEN,
        }
    }
}

struct ListenerConfiguration {
    addr: SocketAddr,
    threads: usize,
    reuse_port: bool,
    receive_buffer_len: usize,
}

impl ListenerConfiguration {
    /// Returns the number of sockets to bind.
    ///
    /// Without port reuse, only the first bind to a port can succeed.
    fn socket_count(&self) -> usize {
        if self.reuse_port {
            self.threads
        } else {
            1
        }
    }
}

/// A statsd listener.
///
/// The listener binds one or more UDP sockets, decodes each datagram it receives, and hands the resulting metric to
/// its [`MetricProcessor`]. Each socket is served by its own worker thread.
///
/// Starting and shutting down are both idempotent, and are mutually exclusive when called from different threads.
/// Dropping a started listener shuts it down.
pub struct Listener {
    config: ListenerConfiguration,
    processor: Arc<dyn MetricProcessor>,
    session: Mutex<Option<Session>>,
}

impl Listener {
    /// Creates a [`ListenerBuilder`].
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::default()
    }

    /// Starts the listener.
    ///
    /// Binds every socket and spawns its worker. Does nothing if the listener is already started.
    ///
    /// # Errors
    ///
    /// If any socket fails to bind, or its worker cannot be started, everything started so far is shut down and an
    /// error is returned.
    pub fn start(&self) -> Result<(), ListenerError> {
        let mut session = self.session.lock();
        if session.is_some() {
            debug!("Listener already started.");
            return Ok(());
        }

        if !self.config.reuse_port && self.config.threads > 1 {
            debug!(threads = self.config.threads, "Port reuse disabled. Binding a single socket.");
        }

        let telemetry = Telemetry::new(self.config.addr.port());
        let mut new_session = Session::new();
        for id in 0..self.config.socket_count() {
            if let Err(e) = self.spawn_worker(id, &mut new_session, &telemetry) {
                error!(error = %e, addr = %self.config.addr, "Failed to start listener.");
                new_session.teardown();
                return Err(e);
            }
        }

        info!(
            addr = %self.config.addr,
            sockets = new_session.workers.len(),
            reuse_port = self.config.reuse_port,
            "Listener started."
        );
        *session = Some(new_session);
        Ok(())
    }

    /// Shuts down the listener.
    ///
    /// Closes every socket and waits for all workers to stop. Datagrams that have not yet been read are dropped. Does
    /// nothing if the listener is not started.
    pub fn shutdown(&self) {
        let mut session = self.session.lock();
        match session.take() {
            Some(session) => {
                session.teardown();
                info!(addr = %self.config.addr, "Listener shut down.");
            }
            None => debug!("Listener not started."),
        }
    }

    /// Returns `true` if the listener is started.
    pub fn is_started(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Returns the local address of each bound socket.
    ///
    /// Empty if the listener is not started.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.workers.iter().map(|worker| worker.local_addr).collect())
            .unwrap_or_default()
    }

    fn spawn_worker(
        &self,
        id: usize,
        session: &mut Session,
        telemetry: &Telemetry,
    ) -> Result<(), ListenerError> {
        let mut socket = bind_socket(self.config.addr, self.config.reuse_port)?;
        let local_addr = socket.local_addr()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        poll.registry().register(&mut socket, SOCKET, Interest::READABLE)?;

        let worker = Worker {
            poll,
            socket,
            local_addr,
            buf: vec![0; self.config.receive_buffer_len],
            processor: Arc::clone(&self.processor),
            telemetry: telemetry.clone(),
            stop: Arc::clone(&session.stop),
        };

        let handle = thread::Builder::new()
            .name(format!("statsd-server-worker-{id}"))
            .spawn(move || worker.run())?;

        debug!(%local_addr, id, "Spawned worker.");
        session.workers.push(WorkerHandle { local_addr, waker, handle });
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.teardown();
        }
    }
}

fn bind_socket(addr: SocketAddr, reuse_port: bool) -> Result<UdpSocket, ListenerError> {
    let bind_error = move |source| ListenerError::Bind { addr, source };

    let socket =
        Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_error)?;
    if reuse_port {
        socket.set_reuse_address(true).map_err(bind_error)?;

        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))))]
        socket.set_reuse_port(true).map_err(bind_error)?;
    }
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;

    Ok(UdpSocket::from_std(socket.into()))
}

/// Sockets and workers for one start/shutdown cycle.
struct Session {
    stop: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
}

struct WorkerHandle {
    local_addr: SocketAddr,
    waker: Waker,
    handle: JoinHandle<()>,
}

impl Session {
    fn new() -> Self {
        Self { stop: Arc::new(AtomicBool::new(false)), workers: Vec::new() }
    }

    fn teardown(self) {
        self.stop.store(true, Ordering::Release);

        for worker in &self.workers {
            if let Err(e) = worker.waker.wake() {
                debug!(error = %e, local_addr = %worker.local_addr, "Failed to wake worker.");
            }
        }

        // Each worker closes its socket as it exits.
        for worker in self.workers {
            if worker.handle.join().is_err() {
                error!(local_addr = %worker.local_addr, "Worker panicked.");
            }
        }
    }
}

struct Worker {
    poll: Poll,
    socket: UdpSocket,
    local_addr: SocketAddr,
    buf: Vec<u8>,
    processor: Arc<dyn MetricProcessor>,
    telemetry: Telemetry,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        let mut events = Events::with_capacity(64);

        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {
                    for event in events.iter() {
                        if event.token() == SOCKET {
                            self.drain_socket();
                        }
                    }
                }
                Err(ref e) if interrupted(e) => {}
                Err(e) => {
                    error!(error = %e, local_addr = %self.local_addr, "Error during poll. Retrying.");
                    self.telemetry.track_poll_failed();
                    thread::sleep(POLL_ERROR_BACKOFF);
                }
            }

            if self.stop.load(Ordering::Acquire) {
                debug!(local_addr = %self.local_addr, "Worker stopping.");
                return;
            }
        }
    }

    /// Reads datagrams until the socket would block.
    fn drain_socket(&mut self) {
        loop {
            match self.socket.recv(&mut self.buf) {
                Ok(len) => process_packet(&self.buf[..len], &*self.processor, &self.telemetry),
                Err(ref e) if would_block(e) => return,
                Err(ref e) if interrupted(e) => {}
                // Readiness is edge-triggered, so keep reading until the socket would block.
                Err(e) => {
                    error!(error = %e, local_addr = %self.local_addr, "Failed to receive datagram.");
                    self.telemetry.track_receive_failed();
                }
            }
        }
    }
}

/// Decodes a single packet and hands the metric to the processor.
///
/// Malformed packets are dropped, as are metrics whose processing panics.
fn process_packet(packet: &[u8], processor: &dyn MetricProcessor, telemetry: &Telemetry) {
    telemetry.track_packet_received();

    match codec::decode(packet) {
        Ok(metric) => {
            trace!(?metric, "Decoded metric.");
            if panic::catch_unwind(AssertUnwindSafe(|| processor.process(metric))).is_ok() {
                telemetry.track_metric_processed();
            } else {
                error!(packet = %String::from_utf8_lossy(packet), "Processor panicked. Dropping metric.");
                telemetry.track_processor_failed();
            }
        }
        Err(e) => {
            debug!(error = %e, packet = %String::from_utf8_lossy(packet), "Dropping malformed packet.");
            telemetry.track_decode_failed();
        }
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

fn interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, UdpSocket as StdUdpSocket},
        sync::atomic::AtomicUsize,
    };

    use metrics::{SharedString, Unit};
    use metrics_util::{
        debugging::{DebugValue, DebuggingRecorder},
        CompositeKey,
    };
    use statsd_common::Metric;

    use super::*;

    fn free_port() -> u16 {
        StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap().local_addr().unwrap().port()
    }

    fn builder(port: u16) -> ListenerBuilder {
        Listener::builder().with_processor(|_: Metric| {}).with_bind_ip(Ipv4Addr::LOCALHOST).with_port(port)
    }

    /// Builds and starts a listener on a free port.
    ///
    /// Another test can grab the port between probing for it and binding it, so binding is retried on a new port.
    fn start_on_free_port(configure: impl Fn(ListenerBuilder) -> ListenerBuilder) -> (Listener, u16) {
        for _ in 0..16 {
            let port = free_port();
            let listener = configure(builder(port)).build().unwrap();
            match listener.start() {
                Ok(()) => return (listener, port),
                Err(ListenerError::Bind { .. }) => continue,
                Err(e) => panic!("failed to start listener: {e}"),
            }
        }
        panic!("no free port found");
    }

    type Snapshot = Vec<(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)>;

    fn counter_value(snapshot: &Snapshot, name: &str, reason: Option<&str>) -> u64 {
        snapshot
            .iter()
            .find_map(|(key, _, _, value)| {
                let key = key.key();
                let matches_reason = reason.map_or(true, |reason| {
                    key.labels().any(|label| label.key() == "reason" && label.value() == reason)
                });
                match value {
                    DebugValue::Counter(count) if key.name() == name && matches_reason => Some(*count),
                    _ => None,
                }
            })
            .unwrap_or(0)
    }

    #[test]
    fn build_without_processor() {
        let result = ListenerBuilder::default().build();
        assert!(matches!(result, Err(BuildError::MissingProcessor)));
    }

    #[test]
    fn build_defaults() {
        let listener = builder(0).with_threads(0).build().unwrap();
        assert_eq!(listener.config.addr.port(), DEFAULT_PORT);
        assert!(listener.config.threads >= 1);
        assert!(!listener.config.reuse_port);
        assert_eq!(listener.config.receive_buffer_len, DEFAULT_RECEIVE_BUFFER_LEN);
        assert!(!listener.is_started());
        assert!(listener.local_addrs().is_empty());
    }

    #[test]
    fn single_socket_without_reuse_port() {
        let (listener, port) = start_on_free_port(|builder| builder.with_threads(4));

        assert_eq!(listener.local_addrs(), [SocketAddr::from((Ipv4Addr::LOCALHOST, port))]);
        listener.shutdown();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn socket_per_thread_with_reuse_port() {
        let (listener, port) = start_on_free_port(|builder| builder.with_threads(3).with_reuse_port(true));

        let addrs = listener.local_addrs();
        assert_eq!(addrs.len(), 3);
        assert!(addrs.iter().all(|addr| addr.port() == port));
        listener.shutdown();
    }

    #[test]
    fn start_and_shutdown_are_idempotent() {
        let (listener, _) = start_on_free_port(|builder| builder);

        listener.start().unwrap();
        assert!(listener.is_started());
        assert_eq!(listener.local_addrs().len(), 1);

        listener.shutdown();
        listener.shutdown();
        assert!(!listener.is_started());
        assert!(listener.local_addrs().is_empty());
    }

    #[test]
    fn shutdown_before_start_is_a_no_op() {
        let listener = builder(free_port()).build().unwrap();

        listener.shutdown();
        assert!(!listener.is_started());
    }

    #[test]
    fn restart_after_shutdown() {
        let (listener, _) = start_on_free_port(|builder| builder);
        listener.shutdown();

        // The port was released by the shutdown, so binding it again succeeds.
        listener.start().unwrap();
        assert!(listener.is_started());
        listener.shutdown();
    }

    #[test]
    fn bind_failure_leaves_listener_stopped() {
        let (first, port) = start_on_free_port(|builder| builder);

        let second = builder(port).build().unwrap();
        match second.start() {
            Err(ListenerError::Bind { addr, .. }) => assert_eq!(addr.port(), port),
            other => panic!("expected bind error, got {:?}", other),
        }
        assert!(!second.is_started());
        assert!(second.local_addrs().is_empty());

        drop(first);

        // Once the port is free again, the failed listener can still be started.
        second.start().unwrap();
        assert!(second.is_started());
    }

    #[test]
    fn failed_bind_tears_down_earlier_sockets() {
        let (occupied, taken_port) = start_on_free_port(|builder| builder);

        let mut session = Session::new();
        let telemetry = Telemetry::new(0);

        let spawned = builder(free_port()).build().unwrap();
        spawned.spawn_worker(0, &mut session, &telemetry).unwrap();
        let bound = session.workers[0].local_addr;

        let failing = builder(taken_port).build().unwrap();
        match failing.spawn_worker(1, &mut session, &telemetry) {
            Err(ListenerError::Bind { addr, .. }) => assert_eq!(addr.port(), taken_port),
            other => panic!("expected bind error, got {:?}", other),
        }
        assert_eq!(session.workers.len(), 1);

        session.teardown();

        // The worker owned the socket, so the port is only free again once it has been joined.
        StdUdpSocket::bind(bound).unwrap();
        drop(occupied);
    }

    #[test]
    fn panicking_processor_does_not_stop_worker() {
        let processed = Arc::new(AtomicUsize::new(0));
        let (listener, port) = start_on_free_port(|builder| {
            let processed = Arc::clone(&processed);
            builder.with_processor(move |metric: Metric| {
                assert_ne!(metric.name(), "boom", "processor failure");
                processed.fetch_add(1, Ordering::AcqRel);
            })
        });

        let sender = StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender.connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        sender.send(b"boom:1|c").unwrap();
        for _ in 0..5 {
            sender.send(b"ok:1|c").unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while processed.load(Ordering::Acquire) < 5 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(processed.load(Ordering::Acquire), 5);
        assert!(listener.is_started());
        listener.shutdown();
    }

    #[test]
    fn process_packet_dispatches_and_drops() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let telemetry = metrics::with_local_recorder(&recorder, || Telemetry::new(8125));

        let processed = Arc::new(AtomicUsize::new(0));
        let processor = {
            let processed = Arc::clone(&processed);
            move |_: Metric| {
                processed.fetch_add(1, Ordering::Relaxed);
            }
        };
        for packet in [&b"foo:1|c"[..], b"foo:1|zz", b"bar:-2|g", b"baz:abc|ms"] {
            process_packet(packet, &processor, &telemetry);
        }
        assert_eq!(processed.load(Ordering::Relaxed), 2);

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(counter_value(&snapshot, "statsd.server.packets_received", None), 4);
        assert_eq!(counter_value(&snapshot, "statsd.server.metrics_processed", None), 2);
        assert_eq!(counter_value(&snapshot, "statsd.server.packets_dropped", Some("decode")), 2);
        assert_eq!(counter_value(&snapshot, "statsd.server.packets_dropped", Some("receive")), 0);
    }

    #[test]
    fn process_packet_counts_processor_panics() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let telemetry = metrics::with_local_recorder(&recorder, || Telemetry::new(8125));

        let processor = |metric: Metric| assert_ne!(metric.name(), "boom", "processor failure");
        for packet in [&b"boom:1|c"[..], b"ok:1|c"] {
            process_packet(packet, &processor, &telemetry);
        }

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(counter_value(&snapshot, "statsd.server.packets_received", None), 2);
        assert_eq!(counter_value(&snapshot, "statsd.server.metrics_processed", None), 1);
        assert_eq!(counter_value(&snapshot, "statsd.server.packets_dropped", Some("processor")), 1);
    }
}
