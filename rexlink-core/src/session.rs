//! Session lifecycle tracking
//!
//! A session moves through identification and feature negotiation before it
//! is usable, and ends exactly once:
//!
//! ```text
//! New -> Identifying -> NegotiatingFeatures -> Connected -> Disconnected
//!  \__________\__________________\_______________________/
//! ```
//!
//! Any state may move to `Disconnected`; nothing leaves it.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, nothing exchanged yet
    New,

    /// Waiting for the identification response
    Identifying,

    /// Waiting for the features response
    NegotiatingFeatures,

    /// Negotiated; peripherals available
    Connected,

    /// Transport closed (terminal)
    Disconnected,
}

impl SessionState {
    fn successor(self) -> Option<SessionState> {
        match self {
            Self::New => Some(Self::Identifying),
            Self::Identifying => Some(Self::NegotiatingFeatures),
            Self::NegotiatingFeatures => Some(Self::Connected),
            Self::Connected | Self::Disconnected => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Identifying => "identifying",
            Self::NegotiatingFeatures => "negotiating features",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Session state tracker
///
/// Validates transitions. Thread-safe and can be cloned cheaply (Arc
/// internally).
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<parking_lot::RwLock<SessionState>>,
}

impl Session {
    /// Create a session in the `New` state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(SessionState::New)),
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.inner.read()
    }

    /// Check if the transport is still considered open
    pub fn is_connected(&self) -> bool {
        !matches!(self.state(), SessionState::Disconnected)
    }

    /// Check if negotiation completed and the session is live
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), SessionState::Connected)
    }

    /// Move to `next`, which must be the direct successor of the current state
    pub fn advance(&self, next: SessionState) -> Result<()> {
        let mut state = self.inner.write();

        if state.successor() != Some(next) {
            return Err(Error::InvalidSessionState(format!(
                "Cannot move from {} to {}",
                *state, next
            )));
        }

        *state = next;
        Ok(())
    }

    /// Close session
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// callers racing to close can tell which one owns the teardown.
    pub fn close(&self) -> bool {
        let mut state = self.inner.write();
        if *state == SessionState::Disconnected {
            return false;
        }
        *state = SessionState::Disconnected;
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
