use std::fmt::Debug;

/// Index into the buffer pool's frame array.
pub type FrameId = usize;

/// Eviction policy over frame indices. The pool only talks to this trait.
pub trait Replacer: Send + Debug {
    /// Pick a frame to evict and stop tracking it. `None` if every tracked frame
    /// is pinned.
    fn victim(&mut self) -> Option<FrameId>;

    /// Mark a frame as not evictable.
    fn pin(&mut self, frame_id: FrameId);

    /// Mark a frame as evictable.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
