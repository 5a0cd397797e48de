use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_futures::join::{join, join_array};
use embassy_time::Duration;
use myrtio_broker::transport::TransportError;
use myrtio_broker::{
    Broker, BrokerOptions, ConnectReasonCode, Handshake, MqttError, MqttTransport, PacketType,
    ProtocolError, ProtocolVersion,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MockError;

impl TransportError for MockError {}

enum Step {
    Data(Vec<u8>),
    Fail,
    Hang,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Step>,
    sent: Vec<u8>,
    closed: usize,
}

/// A scripted connection. Once the script runs out the peer appears closed.
#[derive(Clone, Default)]
struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let transport = Self::default();
        transport.state.borrow_mut().script.extend(steps);
        transport
    }

    fn with_chunks(chunks: &[&[u8]]) -> Self {
        Self::new(chunks.iter().map(|c| Step::Data(c.to_vec())))
    }

    fn sent(&self) -> Vec<u8> {
        self.state.borrow().sent.clone()
    }

    fn closed(&self) -> usize {
        self.state.borrow().closed
    }
}

impl MqttTransport for MockTransport {
    type Error = MockError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), MockError> {
        self.state.borrow_mut().sent.extend_from_slice(buf);
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, MockError> {
        let step = self.state.borrow_mut().script.pop_front();
        match step {
            None => Ok(0),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.state.borrow_mut().script.push_front(Step::Data(rest));
                }
                Ok(n)
            }
            Some(Step::Fail) => Err(MockError),
            Some(Step::Hang) => core::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.state.borrow_mut().closed += 1;
    }
}

/// Serves one connection on a fresh broker and returns the outcome together with the
/// number of registered connections left after shutdown.
fn serve_one<const BUF_SIZE: usize>(
    options: BrokerOptions,
    transport: MockTransport,
) -> (Result<Handshake, MqttError<MockError>>, usize) {
    let broker: Broker<4, BUF_SIZE> = Broker::new(options);
    let (table, result) = block_on(join(broker.run(), async {
        let handler = broker.add_connection(transport).await.unwrap();
        let result = handler.run().await;
        broker.shutdown().await;
        result
    }));
    (result, table.len())
}

fn serve(transport: MockTransport) -> (Result<Handshake, MqttError<MockError>>, usize) {
    serve_one::<1024>(BrokerOptions::new(), transport)
}

const BARE_HANDSHAKE: Handshake = Handshake {
    protocol_version: None,
    keep_alive: 0,
    clean_session: true,
};

#[test]
fn bare_connect_gets_connack_and_connection_is_cleaned_up() {
    let transport = MockTransport::with_chunks(&[&[0x10, 0x00]]);
    let (result, live) = serve(transport.clone());

    assert_eq!(result, Ok(BARE_HANDSHAKE));
    assert_eq!(transport.sent(), [0x20, 0x02, 0x00, 0x00]);
    assert_eq!(transport.closed(), 1);
    assert_eq!(live, 0);
}

#[test]
fn full_connect_split_across_reads() {
    let transport = MockTransport::with_chunks(&[
        &[0x10],
        &[16, 0x00, 0x04, b'M', b'Q'],
        &[b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x04],
        b"dev1",
    ]);
    let (result, live) = serve(transport.clone());

    assert_eq!(
        result,
        Ok(Handshake {
            protocol_version: Some(ProtocolVersion::V3_1_1),
            keep_alive: 60,
            clean_session: true,
        })
    );
    assert_eq!(transport.sent(), [0x20, 0x02, 0x00, 0x00]);
    assert_eq!(transport.closed(), 1);
    assert_eq!(live, 0);
}

#[test]
fn v5_connect_gets_v5_connack() {
    let transport = MockTransport::with_chunks(&[&[
        0x10, 15, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 30, 0x00, 0x00, 0x02,
        b'c', b'5',
    ]]);
    let (result, _) = serve(transport.clone());

    assert_eq!(
        result,
        Ok(Handshake {
            protocol_version: Some(ProtocolVersion::V5),
            keep_alive: 30,
            clean_session: true,
        })
    );
    assert_eq!(transport.sent(), [0x20, 0x03, 0x00, 0x00, 0x00]);
}

#[test]
fn unsupported_protocol_level_is_refused() {
    let transport = MockTransport::with_chunks(&[&[
        0x10, 13, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x06, 0x02, 0x00, 60, 0x00, 0x01, b'x',
    ]]);
    let (result, live) = serve(transport.clone());

    assert_eq!(
        result,
        Err(MqttError::ConnectionRefused(
            ConnectReasonCode::UnacceptableProtocolVersion
        ))
    );
    assert_eq!(transport.sent(), [0x20, 0x02, 0x00, 0x01]);
    assert_eq!(transport.closed(), 1);
    assert_eq!(live, 0);
}

#[test]
fn empty_client_id_needs_clean_session() {
    let persistent = MockTransport::with_chunks(&[&[
        0x10, 12, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x00, 0x00, 60, 0x00, 0x00,
    ]]);
    let (result, _) = serve(persistent.clone());
    assert_eq!(
        result,
        Err(MqttError::ConnectionRefused(
            ConnectReasonCode::IdentifierRejected
        ))
    );
    assert_eq!(persistent.sent(), [0x20, 0x02, 0x00, 0x02]);

    let clean = MockTransport::with_chunks(&[&[
        0x10, 12, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 60, 0x00, 0x00,
    ]]);
    let (result, _) = serve(clean.clone());
    assert!(result.is_ok());
    assert_eq!(clean.sent(), [0x20, 0x02, 0x00, 0x00]);
}

#[test]
fn other_first_packet_is_not_answered() {
    let transport = MockTransport::with_chunks(&[&[0xC0, 0x00]]);
    let (result, live) = serve(transport.clone());

    assert_eq!(
        result,
        Err(MqttError::Protocol(ProtocolError::UnexpectedPacket(
            PacketType::PingReq
        )))
    );
    assert!(transport.sent().is_empty());
    assert_eq!(transport.closed(), 1);
    assert_eq!(live, 0);
}

#[test]
fn connect_with_reserved_flags_is_malformed() {
    let transport = MockTransport::with_chunks(&[&[0x12, 0x00]]);
    let (result, _) = serve(transport.clone());

    assert_eq!(
        result,
        Err(MqttError::Protocol(ProtocolError::MalformedPacket))
    );
    assert!(transport.sent().is_empty());
}

#[test]
fn peer_closing_early_ends_the_connection() {
    let cases: [&[&[u8]]; 3] = [&[], &[&[0x10]], &[&[0x10, 0x05, 0x00]]];
    for chunks in cases {
        let transport = MockTransport::with_chunks(chunks);
        let (result, live) = serve(transport.clone());

        assert_eq!(
            result,
            Err(MqttError::Protocol(ProtocolError::ConnectionClosed))
        );
        assert!(transport.sent().is_empty());
        assert_eq!(transport.closed(), 1);
        assert_eq!(live, 0);
    }
}

#[test]
fn read_error_is_reported() {
    let transport = MockTransport::new([Step::Data(vec![0x10]), Step::Fail]);
    let (result, live) = serve(transport.clone());

    assert_eq!(result, Err(MqttError::Transport(MockError)));
    assert_eq!(transport.closed(), 1);
    assert_eq!(live, 0);
}

#[test]
fn silent_peer_times_out() {
    let transport = MockTransport::new([Step::Data(vec![0x10]), Step::Hang]);
    let options = BrokerOptions::new().with_read_timeout(Duration::from_millis(50));
    let (result, live) = serve_one::<1024>(options, transport.clone());

    assert_eq!(result, Err(MqttError::Timeout));
    assert_eq!(transport.closed(), 1);
    assert_eq!(live, 0);
}

#[test]
fn bare_connect_can_be_disallowed() {
    let transport = MockTransport::with_chunks(&[&[0x10, 0x00]]);
    let options = BrokerOptions::new().with_bare_connect(false);
    let (result, _) = serve_one::<1024>(options, transport.clone());

    assert_eq!(
        result,
        Err(MqttError::Protocol(ProtocolError::MalformedPacket))
    );
    assert!(transport.sent().is_empty());
}

#[test]
fn packet_larger_than_buffer_is_rejected() {
    let transport = MockTransport::with_chunks(&[&[0x10, 20, 0x00, 0x04]]);
    let (result, _) = serve_one::<8>(BrokerOptions::new(), transport.clone());

    assert_eq!(result, Err(MqttError::Protocol(ProtocolError::PacketTooLarge)));
    assert_eq!(transport.closed(), 1);
}

#[test]
fn full_registry_closes_new_transport() {
    let broker: Broker<1> = Broker::new(BrokerOptions::new());
    let first = MockTransport::with_chunks(&[&[0x10, 0x00]]);
    let second = MockTransport::with_chunks(&[&[0x10, 0x00]]);

    let (table, (rejected, served)) = block_on(join(broker.run(), async {
        let handler = broker.add_connection(first.clone()).await.unwrap();
        let rejected = broker.add_connection(second.clone()).await.err();
        let served = handler.run().await;
        broker.shutdown().await;
        (rejected, served)
    }));

    assert_eq!(rejected, Some(MqttError::RegistryFull));
    assert_eq!(second.closed(), 1);
    assert!(second.sent().is_empty());
    assert_eq!(served, Ok(BARE_HANDSHAKE));
    assert_eq!(first.closed(), 1);
    assert!(table.is_empty());
}

#[test]
fn connections_after_shutdown_are_refused() {
    let broker: Broker<2> = Broker::new(BrokerOptions::new());
    let transport = MockTransport::with_chunks(&[&[0x10, 0x00]]);

    let (table, rejected) = block_on(join(broker.run(), async {
        broker.shutdown().await;
        broker.add_connection(transport.clone()).await.err()
    }));

    assert_eq!(rejected, Some(MqttError::RegistryClosed));
    assert_eq!(transport.closed(), 1);
    assert!(table.is_empty());
}

#[test]
fn concurrent_connections_are_all_served() {
    const N: usize = 4;
    let broker: Broker<N> = Broker::new(BrokerOptions::new());
    let transports: [MockTransport; N] =
        core::array::from_fn(|_| MockTransport::with_chunks(&[&[0x10], &[0x00]]));

    let (table, results) = block_on(join(broker.run(), async {
        let results = join_array(transports.clone().map(|transport| {
            let broker = &broker;
            async move { broker.add_connection(transport).await?.run().await }
        }))
        .await;
        broker.shutdown().await;
        results
    }));

    assert!(table.is_empty());
    assert_eq!(broker.active_connections(), 0);
    for (result, transport) in results.iter().zip(&transports) {
        assert_eq!(result, &Ok(BARE_HANDSHAKE));
        assert_eq!(transport.sent(), [0x20, 0x02, 0x00, 0x00]);
        assert_eq!(transport.closed(), 1);
    }
}
