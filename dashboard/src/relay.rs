//! Event streaming from the dashboard core to whoever presents it.
//!
//! A [`Relay`] is the sending half of an unbounded channel. The core keeps the
//! relay and the presentation layer drains the paired receiver, so observers
//! only ever see published values and never touch core state.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

/// Type-safe event relay.
///
/// Relays are named after the event they carry, e.g. `snapshot_relay`
/// publishes active-set snapshots and `notification_relay` user-facing
/// notices.
#[derive(Clone, Debug)]
pub struct Relay<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: UnboundedSender<T>,
}

/// Error type for Relay operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The channel has been closed (receiver dropped)
    ChannelClosed,
}

impl<T> Relay<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new Relay with its receiver stream.
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (sender, receiver) = unbounded();
        (Relay { sender }, receiver)
    }

    /// Send an event through the relay.
    ///
    /// If the receiver has been dropped the event is discarded; a dashboard
    /// without observers keeps working.
    pub fn send(&self, value: T) {
        let _ = self.sender.unbounded_send(value);
    }

    /// Send an event, reporting a closed channel.
    pub fn try_send(&self, value: T) -> Result<(), RelayError> {
        self.sender
            .unbounded_send(value)
            .map_err(|_| RelayError::ChannelClosed)
    }
}

impl<T> Default for Relay<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A disconnected relay: events are silently discarded.
    fn default() -> Self {
        let (relay, _receiver) = Self::new();
        relay
    }
}

/// Creates a new Relay with an associated receiver stream.
pub fn relay<T>() -> (Relay<T>, UnboundedReceiver<T>)
where
    T: Clone + Send + Sync + 'static,
{
    Relay::new()
}
