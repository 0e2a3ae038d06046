//! Outbound notifications to control surfaces
//!
//! The only way GUI/network/MIDI layers learn of engine state changes
//! is this channel fan-out: `ParamChanged` per de-duplicated control
//! change plus `LoopAdded`/`LoopRemoved` on voice-count changes.
//! Delivery order per subscriber is send order (crossbeam channels are
//! FIFO); nothing polls internal structures.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

use crate::looper::ControlId;

/// A state change pushed out to registered collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A control value changed (already de-duplicated against the
    /// previous value)
    ParamChanged {
        control: ControlId,
        /// Wire-encoded voice index (-2 = global)
        voice: i32,
        value: f32,
        /// Echo of the producer's opaque tag, so the originator can
        /// ignore its own change
        source_tag: u32,
    },
    /// A voice was added at `index`
    LoopAdded { index: usize },
    /// The voice at `index` was removed
    LoopRemoved { index: usize },
}

/// Fan-out point for notifications
///
/// Subscribers each get their own unbounded channel; a dropped
/// receiver is pruned on the next broadcast. Only non-RT threads
/// broadcast (the audio thread never touches this).
pub struct NotificationHub {
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber and return its receiving end
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().expect("notify lock").push(tx);
        rx
    }

    /// Send a notification to every live subscriber, in send order
    pub fn broadcast(&self, notification: Notification) {
        let mut subs = self.subscribers.lock().expect("notify lock");
        subs.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("notify lock").len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_in_order() {
        let hub = NotificationHub::new();
        let rx = hub.subscribe();
        hub.broadcast(Notification::LoopAdded { index: 0 });
        hub.broadcast(Notification::LoopAdded { index: 1 });
        assert_eq!(rx.recv().unwrap(), Notification::LoopAdded { index: 0 });
        assert_eq!(rx.recv().unwrap(), Notification::LoopAdded { index: 1 });
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = NotificationHub::new();
        let rx = hub.subscribe();
        drop(rx);
        hub.broadcast(Notification::LoopRemoved { index: 0 });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
