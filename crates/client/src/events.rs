use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::warn;
use media_common::{IdrRequest, MediaType};

/// Engine-originated notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// First packet ever seen for a source.
    NewSource {
        client_id: u64,
        source_id: u64,
        timestamp: u64,
        media_type: MediaType,
    },
    /// The playout scheduler wants the publisher to emit a keyframe.
    IdrRequest(IdrRequest),
}

/// Capability handed to the client for event delivery.
///
/// `deliver` is invoked synchronously from push and pop paths and must not
/// block; hosts that need to do real work per event should use
/// [`ChannelSink`] and drain the receiver on their own thread.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: MediaEvent);
}

/// Synchronous closure sink, for hosts with cheap handlers.
pub struct FnSink<F>(pub F);

impl<F: Fn(MediaEvent) + Send + Sync> EventSink for FnSink<F> {
    fn deliver(&self, event: MediaEvent) {
        (self.0)(event);
    }
}

/// Bounded-channel sink. A full channel drops the event and counts it
/// rather than ever blocking a media thread.
pub struct ChannelSink {
    tx: Sender<MediaEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<MediaEvent>) {
        let (tx, rx) = channel::bounded(capacity);
        (
            ChannelSink {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: MediaEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event sink full, dropping {event:?}");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u64) -> MediaEvent {
        MediaEvent::NewSource {
            client_id: n,
            source_id: 1,
            timestamp: 0,
            media_type: MediaType::Opus,
        }
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, rx) = ChannelSink::bounded(4);
        sink.deliver(event(1));
        sink.deliver(event(2));

        assert_eq!(rx.try_recv().unwrap(), event(1));
        assert_eq!(rx.try_recv().unwrap(), event(2));
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, rx) = ChannelSink::bounded(1);
        sink.deliver(event(1));
        sink.deliver(event(2));

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), event(1));
        assert!(rx.try_recv().is_err());
    }
}
