//! # Async MQTT Broker Front End for Embedded Systems
//!
//! `myrtio-broker` is a `no_std` compatible, asynchronous MQTT broker front end for
//! embedded systems, built upon the [Embassy](https://embassy.dev/) async ecosystem.
//! It accepts client connections, keeps a registry of the live ones and completes the
//! `CONNECT`/`CONNACK` handshake.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Connection tables and buffers are sized at compile time
//!   using const generics and `heapless`.
//! - **Actor-style registry:** A single task owns the connection table; connection
//!   handlers talk to it through an `embassy-sync` channel.
//! - **MQTT 3.1, 3.1.1 and 5 handshakes:** The `CONNECT` codec detects the protocol
//!   level at runtime and answers in the matching `CONNACK` format.
//! - **Transport Agnostic:** Any stream implementing `MqttTransport` can carry a client,
//!   including `embassy-net` TCP sockets through `TcpTransport`.
//!
//! ## Usage
//!
//! ```ignore
//! static BROKER: Broker<4> = Broker::new(BrokerOptions::new());
//!
//! #[embassy_executor::task]
//! async fn registry_task() {
//!     BROKER.run().await;
//! }
//!
//! #[embassy_executor::task(pool_size = 4)]
//! async fn connection_task(socket: TcpSocket<'static>) {
//!     if let Ok(handler) = BROKER.add_connection(TcpTransport::new(socket)).await {
//!         let _ = handler.run().await;
//!     }
//! }
//! ```
//!
//! The accept loop binds a `TcpSocket` to `BROKER.options().port`, waits in `accept`,
//! and spawns `connection_task` for every client.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod packet;
pub mod packet_type;
pub mod registry;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use broker::Broker;
pub use config::BrokerOptions;
pub use error::{ConnectReasonCode, MqttError, ProtocolError};
pub use handler::{ConnectionHandler, Handshake};
pub use packet::{ProtocolVersion, QoS};
pub use packet_type::{PacketType, name_of};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use transport::{MqttTransport, TcpTransport};
