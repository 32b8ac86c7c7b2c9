//! In-process memory tier.
//!
//! Entries live in a slot arena threaded into a doubly linked list by index,
//! with a hash index from key to slot. Order is insertion order: `put`
//! moves a key to the tail, `get` leaves order untouched, and eviction
//! takes the head.

use crate::signature::Signature;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Node {
    key: String,
    signature: Signature,
    payload: String,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Ordered {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    /// Oldest insertion.
    head: Option<usize>,
    /// Newest insertion.
    tail: Option<usize>,
}

impl Ordered {
    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn push_back(&mut self, node: Node) -> usize {
        let key = node.key.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(node) = self.node_mut(slot) {
            node.prev = None;
            node.next = None;
        }
        match self.tail {
            Some(old_tail) => {
                if let Some(prev) = self.node_mut(old_tail) {
                    prev.next = Some(slot);
                }
                if let Some(node) = self.node_mut(slot) {
                    node.prev = Some(old_tail);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(key, slot);
        slot
    }

    fn unlink(&mut self, slot: usize) -> Option<Node> {
        let node = self.slots.get_mut(slot)?.take()?;

        match node.prev {
            Some(prev) => {
                if let Some(p) = self.node_mut(prev) {
                    p.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.node_mut(next) {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        self.index.remove(&node.key);
        self.free.push(slot);
        Some(node)
    }

    fn remove(&mut self, key: &str) -> Option<Node> {
        let slot = *self.index.get(key)?;
        self.unlink(slot)
    }

    fn pop_front(&mut self) -> Option<Node> {
        let head = self.head?;
        self.unlink(head)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.node(slot) {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }
}

/// Bounded, mutex-guarded map from cache key to `(signature, payload)`.
#[derive(Debug)]
pub struct MemoryTier {
    capacity: usize,
    inner: Mutex<Ordered>,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries (0 behaves as 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Ordered::default()),
        }
    }

    // A panic while holding the lock cannot leave the list half-linked in a
    // way that matters more than losing cached values, so recover.
    fn lock(&self) -> MutexGuard<'_, Ordered> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payload for `key` if it was stored under exactly `signature`.
    pub fn get(&self, key: &str, signature: &Signature) -> Option<String> {
        let inner = self.lock();
        let slot = *inner.index.get(key)?;
        inner
            .node(slot)
            .filter(|node| node.signature == *signature)
            .map(|node| node.payload.clone())
    }

    /// Insert or replace `key` at the freshest position.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn put(&self, key: &str, signature: Signature, payload: String) -> Option<String> {
        let mut inner = self.lock();
        inner.remove(key);

        let evicted = if inner.len() >= self.capacity {
            inner.pop_front().map(|node| node.key)
        } else {
            None
        };

        inner.push_back(Node {
            key: key.to_string(),
            signature,
            payload,
            prev: None,
            next: None,
        });
        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many.
    pub fn remove_prefixed(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner
            .index
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Keys from oldest to newest insertion.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sig(n: i64) -> Signature {
        Signature::new(n, n as u64)
    }

    #[test]
    fn test_get_requires_exact_signature() {
        let tier = MemoryTier::new(4);
        tier.put("k", sig(1), "v".into());

        assert_eq!(tier.get("k", &sig(1)), Some("v".to_string()));
        assert_eq!(tier.get("k", &Signature::new(1, 2)), None);
        assert_eq!(tier.get("missing", &sig(1)), None);
    }

    #[test]
    fn test_evicts_oldest_insertion() {
        let tier = MemoryTier::new(3);
        tier.put("a", sig(1), "1".into());
        tier.put("b", sig(1), "2".into());
        tier.put("c", sig(1), "3".into());

        // Reads do not refresh position.
        assert!(tier.get("a", &sig(1)).is_some());

        let evicted = tier.put("d", sig(1), "4".into());
        assert_eq!(evicted, Some("a".to_string()));
        assert_eq!(tier.len(), 3);
        assert_eq!(tier.keys(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_remove_prefixed_keeps_other_keys() {
        let tier = MemoryTier::new(8);
        tier.put("a::1", sig(1), "1".into());
        tier.put("b::1", sig(1), "2".into());
        tier.put("a::2", sig(1), "3".into());

        assert_eq!(tier.remove_prefixed("a::"), 2);
        assert_eq!(tier.keys(), vec!["b::1"]);

        // Freed slots are reused.
        tier.put("c::1", sig(1), "4".into());
        assert_eq!(tier.keys(), vec!["b::1", "c::1"]);
    }

    #[test]
    fn test_reput_moves_to_freshest() {
        let tier = MemoryTier::new(3);
        tier.put("a", sig(1), "1".into());
        tier.put("b", sig(1), "2".into());
        tier.put("c", sig(1), "3".into());
        assert_eq!(tier.put("a", sig(2), "1b".into()), None);

        assert_eq!(tier.keys(), vec!["b", "c", "a"]);
        assert_eq!(tier.get("a", &sig(2)), Some("1b".to_string()));
        assert_eq!(tier.get("a", &sig(1)), None);

        assert_eq!(tier.put("d", sig(1), "4".into()), Some("b".to_string()));
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let tier = MemoryTier::new(0);
        assert_eq!(tier.capacity(), 1);

        tier.put("a", sig(1), "1".into());
        tier.put("b", sig(1), "2".into());

        assert_eq!(tier.len(), 1);
        assert!(!tier.contains_key("a"));
        assert_eq!(tier.get("b", &sig(1)), Some("2".to_string()));
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let tier = MemoryTier::new(3);
        tier.put("a", sig(1), "1".into());
        tier.put("b", sig(1), "2".into());
        tier.put("c", sig(1), "3".into());

        assert!(tier.remove("b"));
        assert!(!tier.remove("b"));
        assert_eq!(tier.keys(), vec!["a", "c"]);

        tier.put("d", sig(1), "4".into());
        assert_eq!(tier.keys(), vec!["a", "c", "d"]);
        assert_eq!(tier.lock().slots.len(), 3);
    }

    #[test]
    fn test_clear() {
        let tier = MemoryTier::new(2);
        tier.put("a", sig(1), "1".into());
        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.get("a", &sig(1)), None);

        tier.put("b", sig(1), "2".into());
        assert_eq!(tier.keys(), vec!["b"]);
    }

    #[test]
    fn test_concurrent_puts_respect_capacity() {
        let tier = Arc::new(MemoryTier::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = tier.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{t}-{i}");
                        tier.put(&key, sig(i), key.clone());
                        let _ = tier.get(&key, &sig(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tier.len(), 16);
        assert_eq!(tier.keys().len(), 16);
    }
}
