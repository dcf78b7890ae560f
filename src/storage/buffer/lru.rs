use super::replacer::{FrameId, Replacer};
use std::collections::{HashSet, VecDeque};

#[derive(Debug)]
pub struct LruReplacer {
    /// Evictable frames, least recently unpinned at the front
    lru_list: VecDeque<FrameId>,
    pinned: HashSet<FrameId>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru_list: VecDeque::with_capacity(capacity),
            pinned: HashSet::with_capacity(capacity),
        }
    }

    fn position(&self, frame_id: FrameId) -> Option<usize> {
        self.lru_list.iter().position(|&f| f == frame_id)
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        self.lru_list.pop_front()
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(idx) = self.position(frame_id) {
            self.lru_list.remove(idx);
        }
        self.pinned.insert(frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.pinned.remove(&frame_id) || self.position(frame_id).is_none() {
            self.lru_list.push_back(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.lru_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order() {
        let mut replacer = LruReplacer::new(3);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_unpin() {
        let mut replacer = LruReplacer::new(3);
        replacer.unpin(1);
        replacer.unpin(2);

        replacer.pin(1);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);

        // Re-unpinning moves the frame to the tail
        replacer.unpin(3);
        replacer.unpin(1);
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_duplicate_unpin_is_noop() {
        let mut replacer = LruReplacer::new(2);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_pin_untracked() {
        let mut replacer = LruReplacer::new(2);
        replacer.pin(999);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }
}
