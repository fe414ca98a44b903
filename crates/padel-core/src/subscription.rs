//! Scoped listener registrations.
//!
//! Collaborators fan events out over a `tokio::sync::broadcast` channel; each
//! registration owns one receiver, and dropping the `Subscription` is the
//! deregistration.

use tokio::sync::broadcast::{self, error::RecvError};

/// Default buffer for collaborator event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A live registration on a collaborator event stream.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
    label: &'static str,
}

impl<T: Clone> Subscription<T> {
    #[must_use]
    pub const fn new(receiver: broadcast::Receiver<T>, label: &'static str) -> Self {
        Self { receiver, label }
    }

    /// Next event in receipt order, or `None` once the sender is gone.
    ///
    /// A slow listener that falls behind skips the overwritten events and
    /// keeps going; every listener in this crate reacts to "something
    /// changed", so a skipped event loses no information.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} listener lagged, skipped {} events", self.label, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}
