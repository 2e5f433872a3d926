//! Broadcast channel for Devnet provisioning progress (§4.4.1): the
//! DevnetReconciler publishes one event per provisioning step, and
//! `DevnetService::StreamProvisionLog` subscribers replay a capped backlog
//! before following new events. Mirrors the buffer-plus-broadcast shape
//! [`crate::runtime::ProcessRuntime`] already uses for node logs, keyed by
//! devnet instead of by running process.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::metadata::ResourceKey;

const BACKLOG_LINES: usize = 200;
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ProvisionLogEvent {
    pub message: String,
}

struct Topic {
    backlog: VecDeque<String>,
    tx: broadcast::Sender<ProvisionLogEvent>,
}

impl Default for Topic {
    fn default() -> Self {
        Self { backlog: VecDeque::new(), tx: broadcast::channel(CHANNEL_CAPACITY).0 }
    }
}

/// One topic per devnet, created lazily on first publish or subscribe and
/// kept for the life of the process; devnets are provisioned rarely enough
/// that leaking one small topic per name never accumulates meaningfully.
#[derive(Default)]
pub struct ProvisionLogHub {
    topics: Mutex<HashMap<ResourceKey, Topic>>,
}

impl ProvisionLogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` under `devnet`'s topic and broadcasts it to any
    /// live subscribers. Publishing with no subscribers is the common case
    /// and never an error.
    pub fn publish(&self, devnet: &ResourceKey, message: impl Into<String>) {
        let message = message.into();
        let mut topics = self.topics.lock();
        let topic = topics.entry(devnet.clone()).or_default();
        if topic.backlog.len() >= BACKLOG_LINES {
            topic.backlog.pop_front();
        }
        topic.backlog.push_back(message.clone());
        let _ = topic.tx.send(ProvisionLogEvent { message });
    }

    /// Returns `devnet`'s backlog so far plus a receiver for events
    /// published from this point on.
    pub fn subscribe(&self, devnet: &ResourceKey) -> (Vec<String>, broadcast::Receiver<ProvisionLogEvent>) {
        let mut topics = self.topics.lock();
        let topic = topics.entry(devnet.clone()).or_default();
        (topic.backlog.iter().cloned().collect(), topic.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_before_subscribe_is_replayed_via_backlog() {
        let hub = ProvisionLogHub::new();
        let devnet = ResourceKey::new("default", "dev-1");
        hub.publish(&devnet, "allocated subnet");
        let (backlog, _rx) = hub.subscribe(&devnet);
        assert_eq!(backlog, vec!["allocated subnet".to_string()]);
    }

    #[tokio::test]
    async fn live_subscriber_receives_events_published_after_subscribe() {
        let hub = ProvisionLogHub::new();
        let devnet = ResourceKey::new("default", "dev-1");
        let (_backlog, mut rx) = hub.subscribe(&devnet);
        hub.publish(&devnet, "building binary");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.message, "building binary");
    }

    #[test]
    fn topics_are_isolated_per_devnet() {
        let hub = ProvisionLogHub::new();
        hub.publish(&ResourceKey::new("default", "dev-1"), "a");
        let (backlog, _rx) = hub.subscribe(&ResourceKey::new("default", "dev-2"));
        assert!(backlog.is_empty());
    }
}
