//! Signal/slot system for Horizon Rowset.
//!
//! Datasets announce state changes (rows added, cell state changed, focus
//! moved, ...) through signals. Views, binders and lookup consumers connect
//! slots (closures) to the signals they care about.
//!
//! # Key Types
//!
//! - [`Signal<Args>`] - The signal type used for emitting notifications
//! - [`ConnectionId`] - Unique identifier returned when connecting a slot
//!
//! # Reentrancy
//!
//! Slots are invoked synchronously in the emitting thread. The connection
//! table is not locked while slots run, so a slot may connect or disconnect
//! slots (including itself) on the signal that is invoking it. Connections
//! made during an emission are not invoked by that emission.
//!
//! # Example
//!
//! ```
//! use horizon_rowset_core::Signal;
//!
//! let rows_added = Signal::<Vec<u32>>::new();
//!
//! let conn_id = rows_added.connect(|rows| {
//!     println!("{} rows added", rows.len());
//! });
//!
//! rows_added.emit(vec![1, 2, 3]);
//! rows_added.disconnect(conn_id);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a signal-slot connection.
    ///
    /// Use this ID to disconnect a specific connection via [`Signal::disconnect`].
    pub struct ConnectionId;
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A type-safe signal that can have multiple connected slots.
///
/// `Signal<Args>` is `Send + Sync`; a dataset shared behind a lock can be
/// observed from any thread holding a reference to it.
pub struct Signal<Args> {
    connections: Mutex<SlotMap<ConnectionId, Slot<Args>>>,
    blocked: AtomicBool,
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connections.lock().len())
            .field("blocked", &self.blocked.load(Ordering::SeqCst))
            .finish()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(SlotMap::with_key()),
            blocked: AtomicBool::new(false),
        }
    }

    /// Connect a slot (closure) to this signal.
    ///
    /// Returns a `ConnectionId` that can be used to disconnect the slot later.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connections.lock().insert(Arc::new(slot))
    }

    /// Connect a slot that only sees emissions accepted by `filter`.
    ///
    /// This is how per-column subscriptions are expressed: the filter checks
    /// the column carried by the payload.
    pub fn connect_filtered<P, F>(&self, filter: P, slot: F) -> ConnectionId
    where
        P: Fn(&Args) -> bool + Send + Sync + 'static,
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connect(move |args| {
            if filter(args) {
                slot(args);
            }
        })
    }

    /// Disconnect a specific slot by its connection ID.
    ///
    /// Returns `true` if the connection was found and removed, `false` otherwise.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Disconnect all slots from this signal.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Get the number of connected slots.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Block signal emission temporarily.
    ///
    /// While blocked, calls to `emit()` will do nothing.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Check if signal emission is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Emit the signal, invoking all connected slots in connection order.
    #[tracing::instrument(skip_all, target = "horizon_rowset_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return;
        }

        let slots: Vec<Slot<Args>> = self.connections.lock().values().cloned().collect();
        tracing::trace!(target: targets::SIGNAL, connection_count = slots.len(), "emitting signal");

        for slot in slots {
            slot(&args);
        }
    }
}

static_assertions::assert_impl_all!(Signal<()>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_signal_basic() {
        let signal = Signal::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        signal.connect(move |&value| {
            received_clone.lock().push(value);
        });

        signal.emit(42);
        signal.emit(100);

        assert_eq!(*received.lock(), vec![42, 100]);
    }

    #[test]
    fn test_signal_disconnect() {
        let signal = Signal::<i32>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let id = signal.connect(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(1);
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(2);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn test_signal_blocked() {
        let signal = Signal::<()>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        signal.connect(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.set_blocked(true);
        signal.emit(());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        signal.set_blocked(false);
        signal.emit(());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_filtered() {
        let signal = Signal::<(String, i32)>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        signal.connect_filtered(
            |(col, _)| col == "qty",
            move |(_, v)| received_clone.lock().push(*v),
        );

        signal.emit(("name".to_string(), 1));
        signal.emit(("qty".to_string(), 2));

        assert_eq!(*received.lock(), vec![2]);
    }

    #[test]
    fn test_slot_can_disconnect_itself() {
        let signal = Arc::new(Signal::<()>::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let id_cell: Arc<Mutex<Option<ConnectionId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&signal);
        let counter_clone = counter.clone();
        let id_clone = id_cell.clone();
        let id = signal.connect(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            if let (Some(signal), Some(id)) = (weak.upgrade(), *id_clone.lock()) {
                signal.disconnect(id);
            }
        });
        *id_cell.lock() = Some(id);

        signal.emit(());
        signal.emit(());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
