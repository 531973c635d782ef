use std::sync::{Arc, Mutex};

/// What a departing client's cleanup still has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The client never owned the display; nothing to hand over.
    NotOwner,
    /// Ownership moved to the most recently connected survivor (0 when
    /// none is left).
    Promoted(u32),
    /// This client requested the disconnect of the others; it must wait
    /// for the set to drain via [`ClientRegistry::try_complete_epoch`].
    AwaitDrain,
}

/// Tracks connected client ids, the current owner and the
/// disconnect-epoch. One mutex guards all three.
///
/// Ids increase monotonically; the most recently connected client owns
/// the display. An owner may raise the disconnect-epoch, after which
/// every client with a smaller id terminates at its next header boundary.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    current_id: u32,
    disconnect_epoch: u32,
    clients: Vec<u32>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; the new id becomes the owner.
    pub fn register(&self) -> u32 {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.current_id = id;
        inner.clients.push(id);
        id
    }

    #[must_use]
    pub fn current(&self) -> u32 {
        self.inner.lock().expect("registry lock").current_id
    }

    #[must_use]
    pub fn is_owner(&self, id: u32) -> bool {
        self.inner.lock().expect("registry lock").current_id == id
    }

    /// Raise the disconnect-epoch. Only the current owner may do so.
    pub fn request_disconnect_others(&self, id: u32) -> bool {
        let mut inner = self.inner.lock().expect("registry lock");
        if inner.current_id != id {
            return false;
        }
        inner.disconnect_epoch = id;
        true
    }

    /// Whether a client has to terminate: an epoch is set and this client
    /// connected before the epoch owner.
    #[must_use]
    pub fn should_terminate(&self, id: u32) -> bool {
        let inner = self.inner.lock().expect("registry lock");
        inner.disconnect_epoch != 0 && id < inner.disconnect_epoch
    }

    /// Remove a departing client and resolve ownership.
    pub fn deregister(&self, id: u32) -> Departure {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.clients.retain(|&client| client != id);
        if inner.current_id != id {
            return Departure::NotOwner;
        }
        if inner.disconnect_epoch == id {
            if inner.clients.is_empty() {
                inner.current_id = 0;
                inner.disconnect_epoch = 0;
                return Departure::Promoted(0);
            }
            return Departure::AwaitDrain;
        }
        inner.current_id = inner.clients.last().copied().unwrap_or(0);
        Departure::Promoted(inner.current_id)
    }

    /// Finish an [`Departure::AwaitDrain`]: once the set is empty (or a
    /// new client has taken over in the meantime) the epoch resets.
    /// Returns whether the wait is over.
    pub fn try_complete_epoch(&self, id: u32) -> bool {
        let mut inner = self.inner.lock().expect("registry lock");
        if inner.current_id != id {
            // A new connection replaced us while draining; its ownership
            // stands and the stale epoch is dropped.
            inner.disconnect_epoch = 0;
            return true;
        }
        if inner.clients.is_empty() {
            inner.current_id = 0;
            inner.disconnect_epoch = 0;
            return true;
        }
        false
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.inner.lock().expect("registry lock").clients.len()
    }
}
