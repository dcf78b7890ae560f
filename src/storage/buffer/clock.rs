use super::replacer::{FrameId, Replacer};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefBit {
    Evictable,
    SecondChance,
    Pinned,
}

/// Clock sweep over a fixed ring of slots.
#[derive(Debug)]
pub struct ClockReplacer {
    slots: Vec<Option<(FrameId, RefBit)>>,
    hand: usize,
}

impl ClockReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            hand: 0,
        }
    }

    fn slot_of(&self, frame_id: FrameId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some((f, _)) if *f == frame_id))
    }

    fn tick(&mut self) {
        self.hand = (self.hand + 1) % self.slots.len();
    }
}

impl Replacer for ClockReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        if self.slots.is_empty() {
            return None;
        }
        for _ in 0..2 * self.slots.len() {
            let hand = self.hand;
            match self.slots[hand] {
                Some((frame_id, RefBit::Evictable)) => {
                    self.slots[hand] = None;
                    self.tick();
                    return Some(frame_id);
                }
                Some((frame_id, RefBit::SecondChance)) => {
                    self.slots[hand] = Some((frame_id, RefBit::Evictable));
                }
                Some((_, RefBit::Pinned)) | None => {}
            }
            self.tick();
        }
        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(i) = self.slot_of(frame_id) {
            self.slots[i] = Some((frame_id, RefBit::Pinned));
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if let Some(i) = self.slot_of(frame_id) {
            self.slots[i] = Some((frame_id, RefBit::SecondChance));
            return;
        }
        // First empty slot at or after the hand; the hand moves past it
        let len = self.slots.len();
        match (0..len)
            .map(|step| (self.hand + step) % len)
            .find(|&i| self.slots[i].is_none())
        {
            Some(i) => {
                self.slots[i] = Some((frame_id, RefBit::SecondChance));
                self.hand = (i + 1) % len;
            }
            None => warn!("clock ring full, frame {} not tracked", frame_id),
        }
    }

    fn size(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Some((_, bit)) if *bit != RefBit::Pinned))
            .count()
    }
}
