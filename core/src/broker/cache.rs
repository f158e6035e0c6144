//! Per-topic recent-message cache.
//!
//! Each topic gets a bounded FIFO of the most recent publications. On
//! subscription the broker replays the queue in insertion order so a
//! late-joining subscriber catches up before seeing live traffic.

use crate::protocol::Message;
use std::collections::{HashMap, VecDeque};

/// Topic -> bounded FIFO of recent messages.
///
/// Not internally synchronized: the router owns one instance behind the cache
/// lock. Queues are created lazily on first publish and evict from the front
/// once the bound is exceeded.
#[derive(Debug)]
pub struct MessageCache {
    queues: HashMap<String, VecDeque<Message>>,
    capacity: usize,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            capacity,
        }
    }

    /// Current per-topic bound. 0 means caching is disabled.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adjust the bound at runtime. Shrinking trims every existing queue
    /// immediately; a bound of 0 drops all cached messages.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        if capacity == 0 {
            self.queues.clear();
            return;
        }
        for queue in self.queues.values_mut() {
            while queue.len() > capacity {
                queue.pop_front();
            }
        }
    }

    /// Append a message to its topic queue, evicting the oldest entries
    /// beyond the bound. A disabled cache ignores the message.
    pub fn push(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        let queue = self.queues.entry(message.topic().to_string()).or_default();
        queue.push_back(message);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Copy of a topic's queue in insertion order, for replay outside the
    /// cache lock.
    pub fn snapshot(&self, topic: &str) -> Vec<Message> {
        self.queues
            .get(topic)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, topic: &str) -> usize {
        self.queues.get(topic).map(VecDeque::len).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn message(topic: &str, payload: &str) -> Message {
        Message::new(topic, Bytes::from(payload.to_string()))
    }

    #[test]
    fn test_cache_respects_bound() {
        let mut cache = MessageCache::new(3);
        for i in 0..10 {
            cache.push(message("t", &format!("m{}", i)));
        }

        assert_eq!(cache.len("t"), 3);
        let payloads: Vec<_> = cache
            .snapshot("t")
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        assert_eq!(payloads, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn test_cache_keeps_insertion_order() {
        let mut cache = MessageCache::new(10);
        cache.push(message("t", "a"));
        cache.push(message("t", "b"));
        cache.push(message("t", "c"));

        let payloads: Vec<_> = cache
            .snapshot("t")
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let mut cache = MessageCache::new(0);
        cache.push(message("t", "a"));
        assert_eq!(cache.len("t"), 0);
        assert!(cache.snapshot("t").is_empty());
    }

    #[test]
    fn test_shrinking_trims_existing_queues() {
        let mut cache = MessageCache::new(5);
        for i in 0..5 {
            cache.push(message("t", &format!("m{}", i)));
        }

        cache.set_capacity(2);
        assert_eq!(cache.len("t"), 2);
        let payloads: Vec<_> = cache
            .snapshot("t")
            .iter()
            .map(|m| m.payload().clone())
            .collect();
        assert_eq!(payloads, vec!["m3", "m4"]);

        cache.set_capacity(0);
        assert_eq!(cache.len("t"), 0);
        cache.push(message("t", "ignored"));
        assert_eq!(cache.len("t"), 0);
    }

    #[test]
    fn test_topics_are_independent() {
        let mut cache = MessageCache::new(2);
        cache.push(message("a", "1"));
        cache.push(message("a", "2"));
        cache.push(message("a", "3"));
        cache.push(message("b", "x"));

        assert_eq!(cache.len("a"), 2);
        assert_eq!(cache.len("b"), 1);
    }
}
