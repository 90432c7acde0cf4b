use crate::pipeline_settings::FrameSlot;

/// 帧序号和 frames in flight 的换算
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    frames_in_flight: usize,
}
// new & init
impl FrameCounter {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

    pub fn new(init_frame_id: u64, frames_in_flight: usize) -> Self {
        assert!(
            (1..=Self::MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight),
            "frames in flight must be in 1..={}, got {frames_in_flight}",
            Self::MAX_FRAMES_IN_FLIGHT
        );
        Self {
            frame_id: init_frame_id,
            frames_in_flight,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
    #[inline]
    pub fn frame_slots(&self) -> impl Iterator<Item = FrameSlot> {
        (0..self.frames_in_flight).map(FrameSlot)
    }
    #[inline]
    pub fn frame_slot(&self) -> FrameSlot {
        FrameSlot((self.frame_id % self.frames_in_flight as u64) as usize)
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycles_through_frames_in_flight() {
        let mut counter = FrameCounter::new(0, 2);
        let slots = (0..5)
            .map(|_| {
                let slot = *counter.frame_slot();
                counter.next_frame();
                slot
            })
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(counter.frame_name(), "[F5B]");
    }

    #[test]
    #[should_panic(expected = "frames in flight")]
    fn zero_frames_in_flight_panics() {
        FrameCounter::new(0, 0);
    }
}
