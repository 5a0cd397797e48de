//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the stream a client
//! connection arrives on (TCP, UART, an in-memory pipe in tests), allowing the broker
//! to stay hardware and network-stack agnostic.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use crate::fmt::Debug2Format;
use embassy_net::IpEndpoint;
use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embedded_io_async::Write;

/// The error type of transport-independent code such as the codec and the registry.
///
/// It has no values: an `MqttError<ErrorPlaceHolder>` can never hold a transport
/// error, which lets `MqttError::cast_transport_error` convert it without panicking.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorPlaceHolder {}

#[cfg(feature = "defmt")]
impl defmt::Format for ErrorPlaceHolder {
    fn format(&self, _fmt: defmt::Formatter) {
        match *self {}
    }
}

/// A trait representing one accepted client connection.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the connection.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Closes the connection. Called exactly once, when the connection is done.
    async fn close(&mut self);

    /// The address of the peer, if the transport has one.
    fn remote_endpoint(&self) -> Option<IpEndpoint> {
        None
    }
}

// Allow the placeholder to be treated as a transport error for generic contexts.
impl TransportError for ErrorPlaceHolder {}

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

// Implement TransportError for embassy_net tcp error
impl TransportError for TcpError {}

/// TCP transport implementation using `embassy-net`.
///
/// Wraps a socket that has already completed `accept`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpTransport<'a> {
    pub fn new(socket: TcpSocket<'a>) -> Self {
        Self { socket }
    }

    /// Gives the socket back, e.g. to `accept` the next client on it.
    pub fn into_inner(self) -> TcpSocket<'a> {
        self.socket
    }
}

impl<'a> MqttTransport for TcpTransport<'a> {
    type Error = TcpError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX: {} bytes", buf.len());

        self.socket.write_all(buf).await.map_err(|e| {
            warn!("TCP write error: {:?}", Debug2Format(&e));
            e
        })?;

        // Flush to ensure data is actually sent to the network
        self.socket.flush().await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.socket.read(buf).await?;
        trace!("TCP read: {} bytes", n);
        Ok(n)
    }

    async fn close(&mut self) {
        self.socket.close();
        if let Err(e) = self.socket.flush().await {
            debug!("TCP flush on close failed: {:?}", Debug2Format(&e));
            self.socket.abort();
        }
    }

    fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.socket.remote_endpoint()
    }
}
