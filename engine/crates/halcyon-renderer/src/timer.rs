use std::time::{Duration, Instant};

/// 帧计时
///
/// `fps` 使用指数平均，避免单帧抖动
#[derive(Debug)]
pub struct FrameTimer {
    last_tick: Instant,

    delta_time: Duration,
    total_time: Duration,
    frame_count: u64,

    smoothed_delta_s: f32,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::starting_at(Instant::now())
    }
}

impl FrameTimer {
    /// 新一帧的权重
    const SMOOTHING: f32 = 0.1;

    fn starting_at(now: Instant) -> Self {
        Self {
            last_tick: now,
            delta_time: Duration::ZERO,
            total_time: Duration::ZERO,
            frame_count: 0,
            smoothed_delta_s: 0.0,
        }
    }
}

// update
impl FrameTimer {
    /// 每帧开始的时候调用
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        self.delta_time = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.total_time += self.delta_time;
        self.frame_count += 1;

        let delta_s = self.delta_time.as_secs_f32();
        self.smoothed_delta_s = if self.frame_count == 1 {
            delta_s
        } else {
            self.smoothed_delta_s + (delta_s - self.smoothed_delta_s) * Self::SMOOTHING
        };
    }
}

// getters
impl FrameTimer {
    #[inline]
    pub fn delta_time(&self) -> Duration {
        self.delta_time
    }

    /// 上一帧的时间（毫秒）
    #[inline]
    pub fn delta_time_ms(&self) -> f32 {
        self.delta_time.as_secs_f32() * 1000.0
    }

    /// 平滑后的帧率，还没有 tick 过或者间隔为 0 时为 0
    #[inline]
    pub fn fps(&self) -> f32 {
        if self.smoothed_delta_s > 0.0 { 1.0 / self.smoothed_delta_s } else { 0.0 }
    }

    #[inline]
    pub fn total_time_s(&self) -> f32 {
        self.total_time.as_secs_f32()
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_follows_frame_time() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start);
        assert_eq!(timer.fps(), 0.0);

        for frame in 1..=10 {
            timer.tick_at(start + Duration::from_millis(20 * frame));
        }
        assert_eq!(timer.frame_count(), 10);
        assert!((timer.delta_time_ms() - 20.0).abs() < 1e-3);
        assert!((timer.fps() - 50.0).abs() < 1e-2);
        assert!((timer.total_time_s() - 0.2).abs() < 1e-4);
    }

    #[test]
    fn single_slow_frame_is_smoothed() {
        let start = Instant::now();
        let mut timer = FrameTimer::starting_at(start);
        timer.tick_at(start + Duration::from_millis(10));
        timer.tick_at(start + Duration::from_millis(110));

        assert!((timer.delta_time_ms() - 100.0).abs() < 1e-3);
        // 0.01 + (0.1 - 0.01) * 0.1 = 0.019
        assert!((timer.fps() - 1.0 / 0.019).abs() < 0.1);
    }
}
