// src/core/bus/mod.rs

//! The Metrics Bus: a topic-based pub/sub fan-out for health and metrics
//! events (spec §4.I), grounded almost verbatim on the teacher's
//! `DashMap<Topic, Sender>` pub/sub manager. Publishers on `/topic/metrics`
//! and `/topic/stats` are globally throttled to 20 Hz; an explicit `force`
//! bypass exists for state-change events that must never be coalesced away.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, Receiver, Sender};

const CHANNEL_CAPACITY: usize = 256;
/// 20 Hz global throttle (spec §4.I / §4.H): no more than one broadcast
/// every 50 ms per topic, independent of the per-cluster change gate that
/// runs further upstream in the metrics pipeline.
const MIN_BROADCAST_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Metrics,
    Stats,
}

impl Topic {
    pub fn path(&self) -> &'static str {
        match self {
            Topic::Metrics => "/topic/metrics",
            Topic::Stats => "/topic/stats",
        }
    }
}

/// An envelope carrying the owning cluster's owner so private per-user
/// queues can filter without re-deriving ownership (spec §4.I: "per-user
/// private-queue filtering; admins receive all").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub topic_path: &'static str,
    pub owner_id: String,
    pub payload: serde_json::Value,
}

/// The central pub/sub hub. One broadcast channel per topic, plus a
/// last-broadcast timestamp used for the global throttle.
#[derive(Default)]
pub struct MetricsBus {
    channels: DashMap<Topic, Arc<Sender<BusEnvelope>>>,
    last_broadcast: DashMap<Topic, Mutex<Instant>>,
}

impl MetricsBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: Topic) -> Arc<Sender<BusEnvelope>> {
        self.channels
            .entry(topic)
            .or_insert_with(|| Arc::new(broadcast::channel(CHANNEL_CAPACITY).0))
            .value()
            .clone()
    }

    pub fn subscribe(&self, topic: Topic) -> Receiver<BusEnvelope> {
        self.channel(topic).subscribe()
    }

    /// Publishes `envelope` to `topic`, applying the 20 Hz global throttle
    /// unless `force` is set (spec §4.I). Returns the number of receivers
    /// the message reached, or `None` if the publish was throttled away.
    pub fn publish(&self, topic: Topic, envelope: BusEnvelope, force: bool) -> Option<usize> {
        if !force && !self.should_broadcast(topic) {
            return None;
        }
        let sender = self.channel(topic);
        Some(sender.send(envelope).unwrap_or(0))
    }

    fn should_broadcast(&self, topic: Topic) -> bool {
        let entry = self
            .last_broadcast
            .entry(topic)
            .or_insert_with(|| Mutex::new(Instant::now() - MIN_BROADCAST_INTERVAL));
        let mut last = entry.value().lock();
        if last.elapsed() >= MIN_BROADCAST_INTERVAL {
            *last = Instant::now();
            true
        } else {
            false
        }
    }

    /// A maintenance pass removing topics with zero subscribers, run
    /// periodically by `spawn_fixed_delay` (spec §5 idiom).
    pub fn purge_empty_channels(&self) -> usize {
        let mut purged = 0;
        self.channels.retain(|_, sender| {
            if sender.receiver_count() == 0 {
                purged += 1;
                false
            } else {
                true
            }
        });
        purged
    }
}

/// Filters a broadcast receiver's envelope for one viewer: admins see
/// everything; other users see only envelopes whose `owner_id` matches
/// their own (spec §4.I).
pub fn visible_to(envelope: &BusEnvelope, viewer_id: &str, is_admin: bool) -> bool {
    is_admin || envelope.owner_id == viewer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(owner: &str) -> BusEnvelope {
        BusEnvelope {
            topic_path: Topic::Metrics.path(),
            owner_id: owner.to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn throttle_blocks_rapid_successive_publishes() {
        let bus = MetricsBus::new();
        let _rx = bus.subscribe(Topic::Metrics);
        assert!(bus.publish(Topic::Metrics, envelope("alice"), false).is_some());
        assert!(bus.publish(Topic::Metrics, envelope("alice"), false).is_none());
    }

    #[test]
    fn force_bypasses_throttle() {
        let bus = MetricsBus::new();
        let _rx = bus.subscribe(Topic::Metrics);
        assert!(bus.publish(Topic::Metrics, envelope("alice"), false).is_some());
        assert!(bus.publish(Topic::Metrics, envelope("alice"), true).is_some());
    }

    #[test]
    fn non_admin_only_sees_own_clusters() {
        let e = envelope("alice");
        assert!(visible_to(&e, "alice", false));
        assert!(!visible_to(&e, "bob", false));
        assert!(visible_to(&e, "bob", true));
    }
}
