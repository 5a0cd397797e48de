//! # Broker
//!
//! The composition root: a [`Broker`] owns the connection registry and the runtime
//! options, and turns accepted transports into [`ConnectionHandler`]s.
//!
//! Embassy tasks cannot be spawned generically from library code, so the application
//! drives three things: the registry loop ([`Broker::run`]), an accept loop, and one
//! task per connection running [`ConnectionHandler::run`].

use crate::config::BrokerOptions;
use crate::error::MqttError;
use crate::handler::ConnectionHandler;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionTable};
use crate::transport::{ErrorPlaceHolder, MqttTransport};

/// An MQTT broker front end serving up to `MAX_CONNECTIONS` clients at once.
///
/// `BUF_SIZE` is the per-connection read buffer and bounds the size of the first
/// packet a client may send.
pub struct Broker<const MAX_CONNECTIONS: usize, const BUF_SIZE: usize = 1024> {
    registry: ConnectionRegistry<MAX_CONNECTIONS>,
    options: BrokerOptions,
}

impl<const MAX_CONNECTIONS: usize, const BUF_SIZE: usize> Broker<MAX_CONNECTIONS, BUF_SIZE> {
    pub const fn new(options: BrokerOptions) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            options,
        }
    }

    /// Registers an accepted connection and returns the handler that serves it.
    ///
    /// If the registry refuses the connection the transport is closed before the
    /// error is returned.
    pub async fn add_connection<T: MqttTransport>(
        &self,
        mut transport: T,
    ) -> Result<ConnectionHandler<'_, T, MAX_CONNECTIONS, BUF_SIZE>, MqttError<T::Error>> {
        let handle = ConnectionHandle {
            remote: transport.remote_endpoint(),
        };
        match self.registry.add_connection(handle).await {
            Ok(id) => Ok(ConnectionHandler::new(
                id,
                transport,
                &self.registry,
                self.options,
            )),
            Err(e) => {
                warn!("Rejecting connection: {:?}", e);
                transport.close().await;
                Err(MqttError::cast_transport_error(e))
            }
        }
    }

    /// Deregisters a connection. Handlers do this themselves when they finish.
    pub async fn remove_connection(
        &self,
        id: ConnectionId,
    ) -> Result<(), MqttError<ErrorPlaceHolder>> {
        self.registry.remove_connection(id).await
    }

    /// Runs the registry's processing loop until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> ConnectionTable<MAX_CONNECTIONS> {
        info!("Broker starting on port {}", self.options.port);
        self.registry.run().await
    }

    pub async fn shutdown(&self) {
        info!("Broker shutting down");
        self.registry.shutdown().await;
    }

    pub fn active_connections(&self) -> usize {
        self.registry.active_connections()
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    pub fn registry(&self) -> &ConnectionRegistry<MAX_CONNECTIONS> {
        &self.registry
    }
}
