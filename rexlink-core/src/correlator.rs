//! Request/response correlation on top of the dispatch table
//!
//! An awaiter is a one-shot listener: the first payload delivered for its
//! command completes the future and removes the listener. Only one awaiter
//! per response command may be armed at a time; arming a second one while
//! the first is pending fails with [`Error::ResponsePending`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::{
    command::Command,
    dispatch::{DispatchTable, Entry, ListenerId, Listener, TableInner},
    error::{Error, Result},
};

impl DispatchTable {
    /// Arm a one-shot awaiter for `command`
    ///
    /// Arm before sending the request so a fast response cannot slip past.
    ///
    /// # Errors
    ///
    /// - [`Error::ResponsePending`] if an awaiter for `command` is armed
    /// - [`Error::Disconnected`] if the table is closed
    pub fn await_response(&self, command: Command) -> Result<ResponseFuture> {
        let raw = u32::from(command);
        let id = self.inner.next_id();
        let (tx, rx) = oneshot::channel();

        let slot = Mutex::new(Some(tx));
        let table: Weak<TableInner> = Arc::downgrade(&self.inner);
        let listener: Listener = Arc::new(move |payload: &Bytes| {
            let sender = slot.lock().take();
            if let Some(sender) = sender {
                if let Some(inner) = table.upgrade() {
                    inner.remove_awaiter(raw, id);
                }
                // The caller may have given up already.
                let _ = sender.send(payload.clone());
            }
            Ok(())
        });

        {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return Err(Error::Disconnected);
            }
            if !registry.pending.insert(raw) {
                return Err(Error::ResponsePending { command });
            }
            registry
                .listeners
                .entry(raw)
                .or_default()
                .push(Entry { id, listener });
        }

        trace!(table = %self.inner.label(), %command, "Response awaiter armed");

        Ok(ResponseFuture {
            rx,
            guard: AwaiterGuard {
                table: Arc::downgrade(&self.inner),
                command: raw,
                id,
            },
        })
    }

    /// Check if an awaiter for `command` is armed
    pub fn is_pending(&self, command: Command) -> bool {
        self.inner
            .registry
            .lock()
            .pending
            .contains(&u32::from(command))
    }
}

/// Future resolving to the payload of the awaited response
///
/// Dropping it before completion unregisters the awaiter.
#[must_use = "a response awaiter does nothing unless awaited"]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Bytes>,
    guard: AwaiterGuard,
}

struct AwaiterGuard {
    table: Weak<TableInner>,
    command: u32,
    id: ListenerId,
}

impl Drop for AwaiterGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.table.upgrade() {
            inner.remove_awaiter(self.command, self.id);
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| Error::Disconnected))
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("command", &crate::command::describe(self.guard.command))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_awaiter_resolves_and_unregisters() {
        let table = DispatchTable::new("test");
        let response = table.await_response(Command::IdResponse).unwrap();
        assert!(table.is_pending(Command::IdResponse));
        assert_eq!(table.listener_count(Command::IdResponse), 1);

        let delivered = table
            .dispatch(0x0e, &Bytes::from_static(b"001e331d0fb6"))
            .unwrap();
        assert_eq!(delivered, 1);

        assert_eq!(response.await.unwrap(), Bytes::from_static(b"001e331d0fb6"));
        assert!(!table.is_pending(Command::IdResponse));
        assert_eq!(table.listener_count(Command::IdResponse), 0);

        // A second response with nobody waiting is unhandled.
        assert_eq!(table.dispatch(0x0e, &Bytes::new()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolves_across_tasks() {
        let table = DispatchTable::new("test");
        let response = table.await_response(Command::FeaturesResponse).unwrap();

        let dispatcher = table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            dispatcher.dispatch(0x0b, &Bytes::from_static(&[1, 2, 3])).unwrap();
        });

        assert_eq!(response.await.unwrap().as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_second_concurrent_awaiter_rejected() {
        let table = DispatchTable::new("test");
        let _first = table.await_response(Command::IdResponse).unwrap();

        let second = table.await_response(Command::IdResponse);
        assert!(matches!(
            second,
            Err(Error::ResponsePending {
                command: Command::IdResponse
            })
        ));

        // Other commands are unaffected.
        assert!(table.await_response(Command::FeaturesResponse).is_ok());
    }

    #[tokio::test]
    async fn test_sequential_awaiters_get_their_own_payload() {
        let table = DispatchTable::new("test");

        let first = table.await_response(Command::IdResponse).unwrap();
        table.dispatch(0x0e, &Bytes::from_static(b"first")).unwrap();
        assert_eq!(first.await.unwrap(), Bytes::from_static(b"first"));

        let second = table.await_response(Command::IdResponse).unwrap();
        table.dispatch(0x0e, &Bytes::from_static(b"second")).unwrap();
        assert_eq!(second.await.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_dropped_awaiter_frees_slot() {
        let table = DispatchTable::new("test");
        let response = table.await_response(Command::IdResponse).unwrap();
        drop(response);

        assert!(!table.is_pending(Command::IdResponse));
        assert_eq!(table.listener_count(Command::IdResponse), 0);
        assert!(table.await_response(Command::IdResponse).is_ok());
    }

    #[tokio::test]
    async fn test_timed_out_awaiter_frees_slot() {
        let table = DispatchTable::new("test");
        let response = table.await_response(Command::IdResponse).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(10), response).await;
        assert!(result.is_err());
        assert!(!table.is_pending(Command::IdResponse));
    }

    #[tokio::test]
    async fn test_close_fails_pending_awaiters() {
        let table = DispatchTable::new("test");
        let response = table.await_response(Command::IdResponse).unwrap();

        table.close();

        assert!(matches!(response.await, Err(Error::Disconnected)));
        assert!(matches!(
            table.await_response(Command::IdResponse),
            Err(Error::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_awaiter_coexists_with_regular_listener() {
        let table = DispatchTable::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        table.register(Command::IdResponse, move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        });

        let response = table.await_response(Command::IdResponse).unwrap();
        assert_eq!(table.dispatch(0x0e, &Bytes::from_static(b"id")).unwrap(), 2);

        assert_eq!(response.await.unwrap(), Bytes::from_static(b"id"));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(table.listener_count(Command::IdResponse), 1);
    }
}
