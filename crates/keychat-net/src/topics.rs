//! Subscription bookkeeping.
//!
//! Remembers which topics the channel has subscribed to, so they can be
//! restored after a reconnect and released on close.

use std::collections::HashSet;

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct TopicSet {
    topics: HashSet<String>,
}

impl TopicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a topic. Returns `false` if it was already tracked.
    pub fn insert(&mut self, topic: &str) -> bool {
        let added = self.topics.insert(topic.to_string());
        if added {
            debug!(topic = %topic, "Tracking topic");
        }
        added
    }

    pub fn remove(&mut self, topic: &str) -> bool {
        let removed = self.topics.remove(topic);
        if removed {
            debug!(topic = %topic, "Stopped tracking topic");
        }
        removed
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// All tracked topics, sorted for stable iteration.
    pub fn all(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn clear(&mut self) -> Vec<String> {
        let topics = self.all();
        self.topics.clear();
        topics
    }
}
