//! Command dispatch table
//!
//! Maps a command identifier to the listeners interested in it. The receive
//! loop of a connection calls [`DispatchTable::dispatch`] for every inbound
//! envelope while application code registers and unregisters listeners from
//! other tasks, so all access goes through one lock. Listeners are invoked on
//! a snapshot taken under the lock and never while it is held, which lets a
//! listener unregister itself.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    command::{self, Command},
    error::Result,
};

/// A listener receives the payload of every envelope for its command
///
/// Returning an error stops delivery of the current envelope and is
/// propagated to the caller of [`DispatchTable::dispatch`].
pub type Listener = Arc<dyn Fn(&Bytes) -> Result<()> + Send + Sync>;

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-connection command registry
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct DispatchTable {
    pub(crate) inner: Arc<TableInner>,
}

pub(crate) struct TableInner {
    label: String,
    next_id: AtomicU64,
    pub(crate) registry: Mutex<Registry>,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) listeners: HashMap<u32, Vec<Entry>>,
    /// Commands with an armed response awaiter
    pub(crate) pending: HashSet<u32>,
    pub(crate) closed: bool,
}

pub(crate) struct Entry {
    pub(crate) id: ListenerId,
    pub(crate) listener: Listener,
}

impl DispatchTable {
    /// Create an empty table; `label` only appears in log output
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TableInner {
                label: label.into(),
                next_id: AtomicU64::new(1),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register a listener for `command`
    ///
    /// Listeners for the same command run in registration order.
    pub fn register<F>(&self, command: Command, listener: F) -> ListenerId
    where
        F: Fn(&Bytes) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        let mut registry = self.inner.registry.lock();

        if registry.closed {
            debug!(table = %self.inner.label, %command, "Ignoring registration on closed table");
            return id;
        }

        registry
            .listeners
            .entry(command.into())
            .or_default()
            .push(Entry {
                id,
                listener: Arc::new(listener),
            });

        trace!(table = %self.inner.label, %command, ?id, "Listener registered");
        id
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn unregister(&self, command: Command, id: ListenerId) -> bool {
        self.inner.remove(command.into(), id).is_some()
    }

    /// Deliver `payload` to every listener registered for `command`
    ///
    /// Returns the number of listeners invoked. Having no listener is not an
    /// error: the envelope is reported as unhandled and dropped.
    pub fn dispatch(&self, command: u32, payload: &Bytes) -> Result<usize> {
        let snapshot: Vec<Listener> = {
            let registry = self.inner.registry.lock();
            registry
                .listeners
                .get(&command)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.listener)).collect())
                .unwrap_or_default()
        };

        if snapshot.is_empty() {
            warn!(
                table = %self.inner.label,
                command = %command::describe(command),
                len = payload.len(),
                "Unhandled command"
            );
            return Ok(0);
        }

        for listener in &snapshot {
            listener(payload)?;
        }

        Ok(snapshot.len())
    }

    /// Number of listeners currently registered for `command`
    pub fn listener_count(&self, command: Command) -> usize {
        self.inner
            .registry
            .lock()
            .listeners
            .get(&u32::from(command))
            .map_or(0, Vec::len)
    }

    /// Drop every listener and refuse new response awaiters
    ///
    /// Pending awaiters resolve with [`crate::Error::Disconnected`].
    /// Idempotent.
    pub fn close(&self) {
        let drained = {
            let mut registry = self.inner.registry.lock();
            registry.closed = true;
            registry.pending.clear();
            std::mem::take(&mut registry.listeners)
        };

        if !drained.is_empty() {
            debug!(table = %self.inner.label, commands = drained.len(), "Dispatch table closed");
        }
        // Dropping the listeners outside the lock releases any awaiter's sender.
        drop(drained);
    }

    /// Check if [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed
    }
}

impl TableInner {
    pub(crate) fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    fn remove(&self, command: u32, id: ListenerId) -> Option<Listener> {
        let mut registry = self.registry.lock();
        let entries = registry.listeners.get_mut(&command)?;
        let position = entries.iter().position(|e| e.id == id)?;
        let entry = entries.remove(position);
        if entries.is_empty() {
            registry.listeners.remove(&command);
        }
        Some(entry.listener)
    }

    /// Remove a response awaiter and release its pending slot
    ///
    /// The slot is only released when the entry was still present, so a
    /// late call cannot free the slot of a newer awaiter.
    pub(crate) fn remove_awaiter(&self, command: u32, id: ListenerId) {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = match registry.listeners.get_mut(&command) {
                Some(entries) => match entries.iter().position(|e| e.id == id) {
                    Some(position) => Some(entries.remove(position)),
                    None => None,
                },
                None => None,
            };
            if removed.is_some() {
                registry.pending.remove(&command);
                if registry.listeners.get(&command).is_some_and(Vec::is_empty) {
                    registry.listeners.remove(&command);
                }
            }
            removed
        };
        drop(removed);
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("DispatchTable")
            .field("label", &self.inner.label)
            .field("commands", &registry.listeners.len())
            .field("pending", &registry.pending.len())
            .field("closed", &registry.closed)
            .finish()
    }
}
