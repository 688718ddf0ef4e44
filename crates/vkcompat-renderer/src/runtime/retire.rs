//! Deferred destruction of objects recorded command buffers may still use.

use ash::vk;

use super::textures::GpuTexture;

/// A device object waiting to be destroyed.
pub enum Retired {
    Framebuffer(vk::Framebuffer),
    Texture(GpuTexture),
    DescriptorSet(vk::DescriptorSet),
}

/// Objects waiting for a frame slot's fence, one list per slot.
pub struct RetireQueue<T> {
    slots: Vec<Vec<T>>,
}

impl<T> RetireQueue<T> {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count.max(1)).map(|_| Vec::new()).collect(),
        }
    }

    /// Slot whose next fence wait covers every frame that may have used an
    /// object retired now.
    ///
    /// While a frame is recording that is its own slot. Between frames the
    /// last user was the previous frame, whose slot comes round again before
    /// the current one's does.
    pub fn slot_for(&self, current_slot: usize, frame_active: bool) -> usize {
        let count = self.slots.len();
        if frame_active {
            current_slot % count
        } else {
            (current_slot + count - 1) % count
        }
    }

    pub fn list(&mut self, slot: usize) -> &mut Vec<T> {
        let count = self.slots.len();
        &mut self.slots[slot % count]
    }

    /// Objects safe to destroy now that `slot`'s fence has signalled.
    pub fn take(&mut self, slot: usize) -> Vec<T> {
        std::mem::take(self.list(slot))
    }

    /// Everything, for teardown after the device went idle.
    pub fn take_all(&mut self) -> Vec<T> {
        self.slots.iter_mut().flat_map(std::mem::take).collect()
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame `k` runs on slot `k % 2`; beginning frame `k` waits on the
    /// fence of frame `k - 2`.
    #[test]
    fn test_retired_mid_frame_waits_for_that_frame() {
        let mut queue = RetireQueue::new(2);
        // Retired while frame 3 (slot 1) records.
        let slot = queue.slot_for(1, true);
        queue.list(slot).push("fb");

        // Frame 4 begins on slot 0: frame 3 may still run.
        assert!(queue.take(0).is_empty());
        // Frame 5 begins on slot 1 after frame 3's fence.
        assert_eq!(queue.take(1), vec!["fb"]);
    }

    #[test]
    fn test_retired_between_frames_waits_for_previous_frame() {
        let mut queue = RetireQueue::new(2);
        // Frame 3 (slot 1) has ended; the next frame will use slot 0.
        let slot = queue.slot_for(0, false);
        assert_eq!(slot, 1);
        queue.list(slot).push("tex");

        assert!(queue.take(0).is_empty());
        assert_eq!(queue.take(1), vec!["tex"]);
    }

    #[test]
    fn test_take_all() {
        let mut queue = RetireQueue::new(3);
        queue.list(0).push(1);
        queue.list(2).push(2);
        assert_eq!(queue.pending(), 2);
        let mut all = queue.take_all();
        all.sort();
        assert_eq!(all, vec![1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_single_slot() {
        let queue: RetireQueue<u8> = RetireQueue::new(1);
        assert_eq!(queue.slot_for(0, true), 0);
        assert_eq!(queue.slot_for(0, false), 0);
    }
}
