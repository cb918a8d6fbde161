//! # Event Bus
//!
//! Fan-out of kernel events to observers other than the caller of a command
//! (notebook front-ends, loggers, the CLI). The pipeline publishes each event
//! the moment it is produced, so subscribers see the same ordered log the
//! caller eventually receives.
//!
//! ## Design Decisions
//!
//! Tokio's broadcast channel is used rather than MPSC channels so that:
//!
//! 1. Multiple subscribers receive the same event
//! 2. Slow subscribers lag (and are told so) instead of blocking the pipeline
//! 3. Publishing never awaits
//!
//! Kernel-level diagnostics that belong to no command (a failing profile
//! fragment, for instance) travel on a separate error channel.

use std::collections::HashMap;

use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, trace};

use super::kernel_event::{EventKind, KernelEvent};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorEvent {
    pub error_type: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, strum::Display)]
pub enum ErrorSeverity {
    #[default]
    Warning,
    Error,
    Critical,
}

/// Broadcast hub for [`KernelEvent`]s and kernel-level [`ErrorEvent`]s.
///
/// The bus keeps one internal receiver per channel so that publishing succeeds
/// even while nobody is subscribed.
pub struct EventBus {
    event_sender: broadcast::Sender<KernelEvent>,
    error_sender: broadcast::Sender<ErrorEvent>,
    capacity: usize,
    _internal_receiver: broadcast::Receiver<KernelEvent>,
    _internal_error_receiver: broadcast::Receiver<ErrorEvent>,
}

impl EventBus {
    /// Creates a bus buffering at most `capacity` unreceived events per
    /// subscriber.
    ///
    /// ```rust,no_run
    /// use interactive_kernel::event::EventBus;
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (event_sender, event_receiver) = broadcast::channel(capacity);
        let (error_sender, error_receiver) = broadcast::channel(capacity);
        Self {
            event_sender,
            error_sender,
            capacity,
            _internal_receiver: event_receiver,
            _internal_error_receiver: error_receiver,
        }
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        let event_rx = self.event_sender.subscribe();
        let error_rx = self.error_sender.subscribe();
        (EventReceiver::new(event_rx), ErrorReceiver::new(error_rx))
    }

    pub fn publish(&self, event: KernelEvent) -> EventResult<()> {
        debug_event("Publishing", &event);
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn publish_error(&self, error: ErrorEvent) -> EventResult<()> {
        debug!("Publishing error event: {:?}", error);
        self.error_sender
            .send(error)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn queue_size(&self) -> usize {
        self.event_sender.len()
    }

    pub fn subscribers_size(&self) -> usize {
        self.event_sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub fn debug_event(prefix: &str, event: &KernelEvent) {
    match event.kind() {
        EventKind::StandardOutputValueProduced
        | EventKind::StandardErrorValueProduced
        | EventKind::DisplayedValueUpdated => trace!("{} Event: {:?}", prefix, event),
        _ => debug!("{} Event: {:?}", prefix, event.kind()),
    }
}

pub struct EventReceiver {
    pub receiver: broadcast::Receiver<KernelEvent>,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<KernelEvent>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. When the receiver fell behind, it is
    /// resubscribed at the head of the channel and `Lagged` is returned.
    pub async fn recv(&mut self) -> EventResult<KernelEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }

    /// Events that are already buffered, without waiting.
    pub fn drain(&mut self) -> Vec<KernelEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    /// Turns the receiver into a stream; lagged gaps are skipped.
    pub fn into_stream(self) -> impl Stream<Item = KernelEvent> {
        BroadcastStream::new(self.receiver).filter_map(|event| event.ok())
    }
}

pub struct ErrorReceiver {
    pub receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorReceiver {
    fn new(receiver: broadcast::Receiver<ErrorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> EventResult<ErrorEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| EventError::ReceiveFailed {
                message: e.to_string(),
            })
    }

    /// An error already published, if any. Lagged errors are skipped.
    pub fn try_recv(&mut self) -> Option<ErrorEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(error) => return Some(error),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Event Send failed: {message}")]
    SendFailed { message: String },

    #[error("Event Receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("Event lagged: {count}")]
    Lagged { count: u64 },
}

pub type EventResult<T> = Result<T, EventError>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{command::KernelCommand, event::EventPayload};

    fn succeeded() -> KernelEvent {
        let command = Arc::new(KernelCommand::submit_code("1"));
        KernelEvent::new(&command, EventPayload::CommandSucceeded)
    }

    #[test]
    fn test_publish_without_subscribers_succeeds() {
        let bus = EventBus::new(16);
        assert!(bus.publish(succeeded()).is_ok());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let (mut rx1, _) = bus.subscribe();
        let (mut rx2, _) = bus.subscribe();

        bus.publish(succeeded()).unwrap();

        assert_eq!(rx1.recv().await.unwrap().kind(), EventKind::CommandSucceeded);
        assert_eq!(rx2.recv().await.unwrap().kind(), EventKind::CommandSucceeded);
    }

    #[tokio::test]
    async fn test_lagged_receiver_recovers() {
        let bus = EventBus::new(2);
        let (mut rx, _) = bus.subscribe();
        for _ in 0..5 {
            bus.publish(succeeded()).unwrap();
        }

        assert!(matches!(rx.recv().await, Err(EventError::Lagged { .. })));

        bus.publish(succeeded()).unwrap();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_error_channel() {
        let bus = EventBus::new(16);
        let (_, mut error_rx) = bus.subscribe();

        bus.publish_error(ErrorEvent {
            error_type: "ProfileFailed".to_string(),
            message: "test message".to_string(),
            ..Default::default()
        })
        .unwrap();

        let received = error_rx.recv().await.unwrap();
        assert_eq!(received.error_type, "ProfileFailed");
        assert_eq!(received.severity, ErrorSeverity::Warning);
    }
}
