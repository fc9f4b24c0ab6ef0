//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a cloneable flag backed by a
//! [`tokio::sync::watch`] channel.  Any clone can fire it; every clone observes
//! the new state, both through [`CancellationToken::is_cancelled`] and by
//! awaiting [`CancellationToken::cancelled`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, StreamError};

/// Cloneable cancellation flag shared between a caller and the pulls it
/// wants to be able to abort.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a token in the "not cancelled" state.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Fire the token.  Firing an already cancelled token has no effect.
    pub fn cancel(&self) {
        let changed = self.sender.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if changed {
            tracing::debug!("cancellation token fired");
        }
    }

    /// Whether the token has already fired.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the token fires.  Resolves immediately if it already has.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot observe a
        // closed channel here.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Race `future` against `token`.
///
/// Returns [`StreamError::Cancelled`] without polling `future` when the token
/// has already fired, and as soon as it fires otherwise.
pub async fn race_with_cancel<T, F>(future: F, token: &CancellationToken) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(StreamError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(StreamError::Cancelled),
        result = future => result,
    }
}
