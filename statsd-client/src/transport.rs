use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::RwLock;
use statsd_common::{codec, Metric};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors that could occur while writing metrics to, or closing, a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has already been closed.
    #[error("transport is closed")]
    Closed,

    /// The remote address did not resolve to any socket address.
    #[error("remote address did not resolve to any socket address")]
    UnresolvedAddress,

    /// The underlying socket operation failed.
    #[error("socket operation failed: {0}")]
    Io(#[from] io::Error),
}

/// Sends encoded metrics to a fixed destination.
///
/// Each metric is written as its own datagram.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Writes the metrics, one datagram per metric.
    ///
    /// # Errors
    ///
    /// If the transport is closed, or the underlying socket fails to send, an error is returned.
    fn write(&self, metrics: &[Metric]) -> Result<(), TransportError>;

    /// Closes the transport, waiting for any in-flight writes to complete.
    ///
    /// # Errors
    ///
    /// If the underlying socket fails to close, an error is returned.
    fn close(&self) -> Result<(), TransportError>;

    /// Closes the transport, waiting at most `timeout` for in-flight writes to complete.
    ///
    /// Any metrics which have not been written once the timeout elapses are discarded. The default implementation
    /// ignores the timeout and simply calls [`close`][Transport::close].
    ///
    /// # Errors
    ///
    /// If the underlying socket fails to close, an error is returned.
    fn close_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        let _ = timeout;
        self.close()
    }
}

/// A UDP transport.
///
/// Writes only need shared access to the socket, so concurrent writes from multiple threads proceed in parallel.
/// Closing waits for exclusive access and then releases the socket.
pub struct UdpTransport {
    socket: RwLock<Option<UdpSocket>>,
    closing: AtomicBool,
    peer_addr: SocketAddr,
}

impl UdpTransport {
    /// Creates a `UdpTransport` connected to the given address.
    ///
    /// A socket is bound to an ephemeral port on the unspecified address of the same family as the first address that
    /// `addr` resolves to.
    ///
    /// # Errors
    ///
    /// If the address cannot be resolved, or the socket cannot be bound or connected, an error is returned.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let addrs = addr.to_socket_addrs()?.collect::<Vec<_>>();
        let first = addrs.first().ok_or(TransportError::UnresolvedAddress)?;

        let socket = if first.is_ipv4() {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        } else {
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        };

        Self::from_socket(socket, &addrs[..])
    }

    /// Creates a `UdpTransport` that sends over an existing socket.
    ///
    /// The socket is connected to the given address.
    ///
    /// # Errors
    ///
    /// If the socket cannot be connected, an error is returned.
    pub fn from_socket<A: ToSocketAddrs>(socket: UdpSocket, addr: A) -> Result<Self, TransportError> {
        socket.connect(addr)?;
        let peer_addr = socket.peer_addr()?;
        debug!(%peer_addr, "Connected UDP transport.");

        Ok(Self { socket: RwLock::new(Some(socket)), closing: AtomicBool::new(false), peer_addr })
    }

    /// Sets the write timeout of the underlying socket.
    ///
    /// When the write timeout is reached, the datagram being sent at the time is dropped and the write fails.
    ///
    /// # Errors
    ///
    /// If the transport is closed, or the timeout cannot be applied, an error is returned.
    pub fn with_write_timeout(self, timeout: Duration) -> Result<Self, TransportError> {
        self.socket
            .read()
            .as_ref()
            .ok_or(TransportError::Closed)?
            .set_write_timeout(Some(timeout))?;
        Ok(self)
    }

    /// Returns the address the transport sends to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

impl Transport for UdpTransport {
    fn write(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        if self.is_closing() {
            return Err(TransportError::Closed);
        }

        let socket = self.socket.read();
        let socket = socket.as_ref().ok_or(TransportError::Closed)?;

        let mut buf = Vec::with_capacity(64);
        for (i, metric) in metrics.iter().enumerate() {
            if self.is_closing() {
                debug!(discarded = metrics.len() - i, "Transport closing. Discarding unwritten metrics.");
                return Ok(());
            }

            buf.clear();
            codec::encode_into(metric, &mut buf);
            socket.send(&buf)?;
            trace!(len = buf.len(), "Sent datagram.");
        }

        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.socket.write().take().is_some() {
            debug!(peer_addr = %self.peer_addr, "Closed UDP transport.");
        }
        self.closing.store(true, Ordering::Release);
        Ok(())
    }

    fn close_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        // Stop in-flight writes at their next metric so the exclusive lock frees up as soon as possible.
        self.closing.store(true, Ordering::Release);

        match self.socket.try_write_for(timeout) {
            Some(mut socket) => {
                if socket.take().is_some() {
                    debug!(peer_addr = %self.peer_addr, "Closed UDP transport.");
                }
            }
            None => warn!(
                ?timeout,
                peer_addr = %self.peer_addr,
                "Timed out waiting for in-flight writes. Unwritten metrics will be discarded."
            ),
        }

        Ok(())
    }
}
