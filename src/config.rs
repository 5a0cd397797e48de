//! Broker configuration.

use embassy_time::Duration;

/// Port the reference deployment listens on.
pub const DEFAULT_PORT: u16 = 8080;

/// How long a connection may stay silent before its first packet is complete.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime options of a [`Broker`](crate::Broker).
///
/// Capacities are const generics on the broker itself; this struct holds what can
/// change without resizing any buffer.
///
/// # Example
///
/// ```ignore
/// let options = BrokerOptions::new()
///     .with_port(1883)
///     .with_read_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrokerOptions {
    /// TCP port the accept loop should listen on.
    pub port: u16,
    /// Upper bound for receiving one complete packet.
    pub read_timeout: Duration,
    /// Accept a `CONNECT` with an empty body (`[0x10, 0x00]`) as a minimal handshake.
    pub allow_bare_connect: bool,
}

impl BrokerOptions {
    pub const fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            allow_bare_connect: true,
        }
    }

    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub const fn with_bare_connect(mut self, allow: bool) -> Self {
        self.allow_bare_connect = allow;
        self
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self::new()
    }
}
