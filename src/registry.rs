//! # Connection Registry
//!
//! The registry is an actor: one task runs [`ConnectionRegistry::run`], which owns the
//! table of live connections, and everything else talks to it through a single event
//! channel. Connection handlers never touch the table directly, so concurrent
//! additions and removals are applied strictly one at a time without a lock around
//! the table.
//!
//! Senders are counted while they may still put an event on the channel. After
//! shutdown the loop keeps receiving until that count drops to zero, so every call
//! that returned `Ok` is reflected in the table `run` returns, and no sender is left
//! waiting on a channel nobody reads.
//!
//! ```ignore
//! static REGISTRY: ConnectionRegistry<8> = ConnectionRegistry::new();
//!
//! #[embassy_executor::task]
//! async fn registry_task() {
//!     let table = REGISTRY.run().await;
//!     info!("registry stopped with {} connections", table.len());
//! }
//! ```

use core::pin::pin;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use embassy_net::IpEndpoint;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures::future::{Either, select};
use heapless::LinearMap;

use crate::error::MqttError;
use crate::transport::ErrorPlaceHolder;

/// Depth of the registry's event queue.
///
/// A single slot keeps the channel as close to a rendezvous as embassy allows:
/// a sender waits while the registry is still busy with the previous event.
pub const EVENT_QUEUE_DEPTH: usize = 1;

/// Opaque identifier of an accepted connection.
///
/// Identifiers come from a monotonically increasing counter and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the registry records about a live connection.
///
/// The socket itself stays with its connection handler; the registry only keeps
/// this descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub remote: Option<IpEndpoint>,
}

/// A message for the registry's processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Add {
        id: ConnectionId,
        handle: ConnectionHandle,
    },
    Remove {
        id: ConnectionId,
    },
    Shutdown,
}

/// The table owned by the processing loop.
pub type ConnectionTable<const MAX_CONNECTIONS: usize> =
    LinearMap<ConnectionId, ConnectionHandle, MAX_CONNECTIONS>;

pub type ConnectionEventChannel =
    Channel<CriticalSectionRawMutex, ConnectionEvent, EVENT_QUEUE_DEPTH>;

/// Registry of live connections, holding at most `MAX_CONNECTIONS` entries.
pub struct ConnectionRegistry<const MAX_CONNECTIONS: usize> {
    events: ConnectionEventChannel,
    next_id: AtomicU32,
    /// Connections accepted by `add_connection` and not yet removed by the loop.
    admitted: AtomicUsize,
    /// Table size as last published by the loop.
    active: AtomicUsize,
    /// Calls to `add_connection`/`remove_connection` that may still send an event.
    senders: AtomicUsize,
    /// Raised when the last sender leaves after shutdown.
    idle: Signal<CriticalSectionRawMutex, ()>,
    closed: AtomicBool,
}

impl<const MAX_CONNECTIONS: usize> ConnectionRegistry<MAX_CONNECTIONS> {
    pub const fn new() -> Self {
        Self {
            events: Channel::new(),
            next_id: AtomicU32::new(1),
            admitted: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            senders: AtomicUsize::new(0),
            idle: Signal::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new connection and returns its identifier.
    ///
    /// Waits until the processing loop has room for the event. Fails with
    /// `RegistryClosed` after [`shutdown`](Self::shutdown), with `RegistryFull` when
    /// `MAX_CONNECTIONS` connections are live, and with `IdsExhausted` once the
    /// identifier counter would wrap.
    ///
    /// Dropping the returned future before it completes gives the slot back.
    pub async fn add_connection(
        &self,
        handle: ConnectionHandle,
    ) -> Result<ConnectionId, MqttError<ErrorPlaceHolder>> {
        let _sender = self.enter();
        self.ensure_open()?;
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_CONNECTIONS).then_some(n + 1)
            })
            .map_err(|_| MqttError::RegistryFull)?;
        let mut admission = Admission {
            admitted: &self.admitted,
            armed: true,
        };
        let id = self
            .next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map(ConnectionId)
            .map_err(|_| MqttError::IdsExhausted)?;
        self.events.send(ConnectionEvent::Add { id, handle }).await;
        // From here on only a processed `Remove` frees the slot.
        admission.armed = false;
        Ok(id)
    }

    /// Deregisters a connection. Unknown identifiers are ignored.
    pub async fn remove_connection(
        &self,
        id: ConnectionId,
    ) -> Result<(), MqttError<ErrorPlaceHolder>> {
        let _sender = self.enter();
        self.ensure_open()?;
        self.events.send(ConnectionEvent::Remove { id }).await;
        Ok(())
    }

    /// Stops the processing loop. Later calls to `add_connection` and
    /// `remove_connection` fail with `RegistryClosed`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.events.send(ConnectionEvent::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of registered connections as of the last processed event.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Processes events until shutdown and returns the final table.
    ///
    /// Must run in exactly one task for the lifetime of the registry.
    pub async fn run(&self) -> ConnectionTable<MAX_CONNECTIONS> {
        let mut table = ConnectionTable::new();
        info!("Connection registry started");
        loop {
            let event = self.events.receive().await;
            if !self.apply(&mut table, event) {
                break;
            }
        }
        // Senders that passed the open check before shutdown still deliver.
        while self.senders.load(Ordering::SeqCst) > 0 {
            let receive = self.events.receive();
            let idle = self.idle.wait();
            if let Either::Left((event, _)) = select(pin!(receive), pin!(idle)).await {
                self.apply(&mut table, event);
            }
        }
        while let Ok(event) = self.events.try_receive() {
            self.apply(&mut table, event);
        }
        info!(
            "Connection registry stopped with {} live connections",
            table.len()
        );
        table
    }

    /// Applies one event; returns `false` for `Shutdown`.
    fn apply(&self, table: &mut ConnectionTable<MAX_CONNECTIONS>, event: ConnectionEvent) -> bool {
        let keep_running = match event {
            ConnectionEvent::Add { id, handle } => {
                match table.insert(id, handle) {
                    Ok(_) => info!("Added connection {}", id),
                    // Admission control keeps the table from filling up.
                    Err(_) => error!("Connection table full, dropping {}", id),
                }
                true
            }
            ConnectionEvent::Remove { id } => {
                if table.remove(&id).is_some() {
                    self.admitted.fetch_sub(1, Ordering::AcqRel);
                    info!("Removed connection {}", id);
                } else {
                    debug!("Ignoring removal of unknown connection {}", id);
                }
                true
            }
            ConnectionEvent::Shutdown => false,
        };
        self.active.store(table.len(), Ordering::Release);
        keep_running
    }

    /// Counts the caller as a sender until the returned guard is dropped.
    ///
    /// Must be taken before the open check, so the loop cannot miss a sender that
    /// saw the registry open.
    fn enter(&self) -> InFlight<'_, MAX_CONNECTIONS> {
        self.senders.fetch_add(1, Ordering::SeqCst);
        InFlight { registry: self }
    }

    fn ensure_open(&self) -> Result<(), MqttError<ErrorPlaceHolder>> {
        if self.is_closed() {
            return Err(MqttError::RegistryClosed);
        }
        Ok(())
    }
}

impl<const MAX_CONNECTIONS: usize> Default for ConnectionRegistry<MAX_CONNECTIONS> {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a, const MAX_CONNECTIONS: usize> {
    registry: &'a ConnectionRegistry<MAX_CONNECTIONS>,
}

impl<const MAX_CONNECTIONS: usize> Drop for InFlight<'_, MAX_CONNECTIONS> {
    fn drop(&mut self) {
        let last = self.registry.senders.fetch_sub(1, Ordering::SeqCst) == 1;
        if last && self.registry.is_closed() {
            self.registry.idle.signal(());
        }
    }
}

/// Releases an admitted slot unless the `Add` event reached the channel.
struct Admission<'a> {
    admitted: &'a AtomicUsize,
    armed: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.admitted.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
