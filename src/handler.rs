//! # Connection Handler
//!
//! One `ConnectionHandler` serves one accepted connection: it buffers the first
//! control packet, checks that it is a valid `CONNECT`, answers with a `CONNACK`, and
//! then closes the transport and deregisters the connection. Every exit path ends the
//! same way, whether the peer went away, sent garbage, or completed the handshake.

use core::pin::pin;

use embassy_time::{Instant, Timer};
use futures::future::{Either, select};

use crate::config::BrokerOptions;
use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::fmt::Debug2Format;
use crate::packet::{ConnAck, Connect, DecodePacket, EncodePacket, FixedHeader, ProtocolVersion};
use crate::packet_type::PacketType;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::transport::MqttTransport;

/// What a client announced in an accepted `CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handshake {
    /// `None` for a bare `CONNECT` without variable header.
    pub protocol_version: Option<ProtocolVersion>,
    pub keep_alive: u16,
    pub clean_session: bool,
}

/// Serves a single registered connection.
///
/// Obtained from [`Broker::add_connection`](crate::Broker::add_connection); the
/// connection stays in the registry until [`run`](Self::run) completes.
#[must_use = "the connection stays registered until `run` completes"]
pub struct ConnectionHandler<
    'r,
    T: MqttTransport,
    const MAX_CONNECTIONS: usize,
    const BUF_SIZE: usize,
> {
    id: ConnectionId,
    transport: T,
    registry: &'r ConnectionRegistry<MAX_CONNECTIONS>,
    options: BrokerOptions,
}

impl<'r, T, const MAX_CONNECTIONS: usize, const BUF_SIZE: usize>
    ConnectionHandler<'r, T, MAX_CONNECTIONS, BUF_SIZE>
where
    T: MqttTransport,
{
    pub(crate) fn new(
        id: ConnectionId,
        transport: T,
        registry: &'r ConnectionRegistry<MAX_CONNECTIONS>,
        options: BrokerOptions,
    ) -> Self {
        Self {
            id,
            transport,
            registry,
            options,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serves the connection to completion.
    ///
    /// The transport is closed and the connection removed from the registry before
    /// this returns, on success and on every error.
    pub async fn run(mut self) -> Result<Handshake, MqttError<T::Error>> {
        let mut buf = [0u8; BUF_SIZE];
        let result = self.serve(&mut buf).await;
        match &result {
            Ok(handshake) => debug!(
                "Connection {}: handshake complete, keep alive {}s",
                self.id,
                handshake.keep_alive
            ),
            Err(e) => warn!("Connection {} terminated: {:?}", self.id, Debug2Format(e)),
        }

        self.transport.close().await;
        if let Err(e) = self.registry.remove_connection(self.id).await {
            warn!(
                "Connection {} not deregistered: {:?}",
                self.id,
                Debug2Format(&e)
            );
        }
        result
    }

    async fn serve(&mut self, buf: &mut [u8]) -> Result<Handshake, MqttError<T::Error>> {
        let header = self.read_packet(buf).await?;
        let frame = &buf[..header.frame_len()];
        debug!(
            "Connection {}: {} packet, remaining length {}",
            self.id,
            header.packet_type.name(),
            header.remaining_length
        );

        match header.packet_type {
            PacketType::Connect => self.handle_connect(header, frame).await,
            other => Err(MqttError::Protocol(ProtocolError::UnexpectedPacket(other))),
        }
    }

    /// Reads until `buf` holds one complete packet and returns its fixed header.
    ///
    /// The whole packet must arrive within the configured read timeout.
    async fn read_packet(&mut self, buf: &mut [u8]) -> Result<FixedHeader, MqttError<T::Error>> {
        let deadline = Instant::now() + self.options.read_timeout;
        let mut filled = 0;
        loop {
            let header =
                FixedHeader::parse(&buf[..filled]).map_err(MqttError::cast_transport_error)?;
            if let Some(header) = header {
                if header.frame_len() > buf.len() {
                    return Err(MqttError::Protocol(ProtocolError::PacketTooLarge));
                }
                if filled >= header.frame_len() {
                    return Ok(header);
                }
            }
            if filled == buf.len() {
                return Err(MqttError::Protocol(ProtocolError::PacketTooLarge));
            }

            let n = self.recv_until(deadline, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(MqttError::Protocol(ProtocolError::ConnectionClosed));
            }
            trace!("Connection {}: read {} bytes", self.id, n);
            filled += n;
        }
    }

    /// A helper function to perform a read that gives up at `deadline`.
    async fn recv_until(
        &mut self,
        deadline: Instant,
        buf: &mut [u8],
    ) -> Result<usize, MqttError<T::Error>> {
        // Use `select` to race the read operation against a timer.
        let read_fut = self.transport.recv(buf);
        let timer = Timer::at(deadline);

        match select(pin!(read_fut), pin!(timer)).await {
            Either::Left((Ok(n), _)) => Ok(n),
            Either::Left((Err(e), _)) => Err(MqttError::Transport(e)),
            Either::Right(((), _)) => Err(MqttError::Timeout),
        }
    }

    async fn handle_connect(
        &mut self,
        header: FixedHeader,
        frame: &[u8],
    ) -> Result<Handshake, MqttError<T::Error>> {
        if header.flags != 0 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }

        if header.remaining_length == 0 {
            if !self.options.allow_bare_connect {
                return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
            }
            self.send_connack(ConnAck::accepted(), ProtocolVersion::V3_1_1)
                .await?;
            return Ok(Handshake {
                protocol_version: None,
                keep_alive: 0,
                clean_session: true,
            });
        }

        let connect = match Connect::decode(frame) {
            Ok(connect) => connect,
            Err(MqttError::Protocol(ProtocolError::UnsupportedProtocolVersion(level))) => {
                warn!(
                    "Connection {}: unsupported protocol level {}",
                    self.id,
                    level
                );
                return self
                    .refuse(
                        ConnectReasonCode::UnacceptableProtocolVersion,
                        ProtocolVersion::V3_1_1,
                    )
                    .await;
            }
            Err(e) => return Err(MqttError::cast_transport_error(e)),
        };
        let version = connect.protocol_version;
        debug!(
            "Connection {}: CONNECT client_id={} level={}",
            self.id,
            connect.client_id,
            version.level()
        );

        if connect.client_id.is_empty() && !accepts_empty_client_id(&connect) {
            return self
                .refuse(ConnectReasonCode::IdentifierRejected, version)
                .await;
        }

        self.send_connack(ConnAck::accepted(), version).await?;
        Ok(Handshake {
            protocol_version: Some(version),
            keep_alive: connect.keep_alive,
            clean_session: connect.clean_session,
        })
    }

    async fn refuse(
        &mut self,
        code: ConnectReasonCode,
        version: ProtocolVersion,
    ) -> Result<Handshake, MqttError<T::Error>> {
        self.send_connack(ConnAck::new(false, code), version).await?;
        Err(MqttError::ConnectionRefused(code))
    }

    async fn send_connack(
        &mut self,
        ack: ConnAck,
        version: ProtocolVersion,
    ) -> Result<(), MqttError<T::Error>> {
        let mut out = [0u8; 5];
        let len = ack
            .encode(&mut out, version)
            .map_err(MqttError::cast_transport_error)?;
        self.transport
            .send(&out[..len])
            .await
            .map_err(MqttError::Transport)
    }
}

/// MQTT 3.1.1 lets a clean session start without a client identifier. MQTT 3.1 always
/// requires one, and MQTT 5 would require assigning one in the `CONNACK`, which this
/// broker does not do.
fn accepts_empty_client_id(connect: &Connect<'_>) -> bool {
    connect.protocol_version == ProtocolVersion::V3_1_1 && connect.clean_session
}
