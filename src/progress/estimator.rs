use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use crate::core::{DisplayData, TaskId};
use super::speed::{SlidingWindowSpeed, DEFAULT_WINDOW};

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// 单个任务的估算状态
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// 上一次展示的百分比，用于单调钳制
    pub last_progress: u8,
    /// 上一次通知 UI 的时间，用于节流
    pub last_update_time: Option<Instant>,
    pub speed: SlidingWindowSpeed,
}

impl ProgressState {
    fn new(window: Duration) -> Self {
        Self {
            uploaded_bytes: 0,
            total_bytes: 0,
            last_progress: 0,
            last_update_time: None,
            speed: SlidingWindowSpeed::new(window),
        }
    }

    fn raw_progress(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }

        let ratio = self.uploaded_bytes as f64 / self.total_bytes as f64;
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// 进度 / 速度 / 剩余时间估算器
///
/// 每个任务各自持有一个滑动窗口；采样从不节流，只有"是否通知 UI"受节流控制。
#[derive(Debug)]
pub struct ProgressEstimator {
    states: HashMap<TaskId, ProgressState>,
    throttle_interval: Duration,
    window: Duration,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE, DEFAULT_WINDOW)
    }
}

impl ProgressEstimator {
    pub fn new(throttle_interval: Duration, window: Duration) -> Self {
        Self {
            states: HashMap::new(),
            throttle_interval,
            window,
        }
    }

    /// 记录一次字节数，返回调用方是否应该推送 UI 更新
    pub fn update(&mut self, task_id: &TaskId, uploaded_bytes: u64, total_bytes: u64) -> bool {
        self.update_at(task_id, uploaded_bytes, total_bytes, Instant::now())
    }

    pub fn update_at(
        &mut self,
        task_id: &TaskId,
        uploaded_bytes: u64,
        total_bytes: u64,
        now: Instant,
    ) -> bool {
        let window = self.window;
        let state = self
            .states
            .entry(task_id.clone())
            .or_insert_with(|| ProgressState::new(window));

        state.uploaded_bytes = uploaded_bytes;
        state.total_bytes = total_bytes;
        state.speed.add_sample_at(uploaded_bytes, now);

        let should_emit = match state.last_update_time {
            Some(last) => now.duration_since(last) >= self.throttle_interval,
            None => true,
        };

        if should_emit {
            state.last_update_time = Some(now);
        } else {
            debug!(task_id = %task_id, uploaded_bytes, "progress update throttled");
        }

        should_emit
    }

    /// 当前展示数据，未知任务返回全零
    ///
    /// 百分比不会低于上一次展示的值，即使迟到的事件上报了更少的字节数。
    pub fn display_data(&mut self, task_id: &TaskId) -> DisplayData {
        let Some(state) = self.states.get_mut(task_id) else {
            return DisplayData::default();
        };

        let progress = state.raw_progress().max(state.last_progress);
        state.last_progress = progress;

        let speed = state.speed.speed().max(0.0);
        let remaining = state.total_bytes.saturating_sub(state.uploaded_bytes);
        let remaining_time = if speed > 0.0 {
            (remaining as f64 / speed).ceil() as u64
        } else {
            0
        };

        DisplayData {
            progress,
            speed,
            remaining_time,
        }
    }

    /// 释放某个任务的状态
    pub fn clear(&mut self, task_id: &TaskId) {
        self.states.remove(task_id);
    }

    pub fn clear_all(&mut self) {
        self.states.clear();
    }

    /// 清零计数与速度历史，但保留条目（任务重新开始时使用）
    pub fn reset(&mut self, task_id: &TaskId) {
        if let Some(state) = self.states.get_mut(task_id) {
            state.uploaded_bytes = 0;
            state.last_progress = 0;
            state.last_update_time = None;
            state.speed.clear();
        }
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.states.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_unknown_task_is_zero() {
        let mut estimator = ProgressEstimator::default();
        assert_eq!(estimator.display_data(&TaskId::from("nope")), DisplayData::default());
        assert!(estimator.is_empty());
    }

    #[test]
    fn test_throttle_still_samples() {
        let t0 = Instant::now();
        let task = TaskId::from("T1");
        let mut estimator = ProgressEstimator::default();

        assert!(estimator.update_at(&task, 0, 1000, t0));
        assert!(!estimator.update_at(&task, 500, 1000, t0 + ms(50)));

        let data = estimator.display_data(&task);
        assert_eq!(data.progress, 50);
        assert!((data.speed - 10_000.0).abs() < 1e-6);
        // 500 / 10000 = 0.05s，向上取整
        assert_eq!(data.remaining_time, 1);

        assert!(estimator.update_at(&task, 600, 1000, t0 + ms(100)));
    }

    #[test]
    fn test_progress_never_regresses() {
        let t0 = Instant::now();
        let task = TaskId::from("T1");
        let mut estimator = ProgressEstimator::default();

        let mut last = 0;
        for (i, bytes) in [100u64, 400, 600, 300, 550, 900].into_iter().enumerate() {
            estimator.update_at(&task, bytes, 1000, t0 + ms(i as u64 * 30));
            let progress = estimator.display_data(&task).progress;
            assert!(progress >= last, "{progress} < {last}");
            last = progress;
        }

        assert_eq!(last, 90);
    }

    #[test]
    fn test_progress_rounding_and_bounds() {
        let t0 = Instant::now();
        let task = TaskId::from("T1");
        let mut estimator = ProgressEstimator::default();

        estimator.update_at(&task, 1, 3, t0);
        assert_eq!(estimator.display_data(&task).progress, 33);

        estimator.update_at(&task, 5000, 1000, t0 + ms(200));
        let data = estimator.display_data(&task);
        assert_eq!(data.progress, 100);
        assert_eq!(data.remaining_time, 0);

        let empty = TaskId::from("empty");
        estimator.update_at(&empty, 0, 0, t0);
        assert_eq!(estimator.display_data(&empty).progress, 0);
    }

    #[test]
    fn test_remaining_time() {
        let t0 = Instant::now();
        let task = TaskId::from("T1");
        let mut estimator = ProgressEstimator::default();

        estimator.update_at(&task, 0, 10_000, t0);
        estimator.update_at(&task, 2_000, 10_000, t0 + ms(1000));

        let data = estimator.display_data(&task);
        assert_eq!(data.speed, 2_000.0);
        assert_eq!(data.remaining_time, 4);
    }

    #[test]
    fn test_reset_starts_fresh() {
        let t0 = Instant::now();
        let task = TaskId::from("T1");
        let mut estimator = ProgressEstimator::default();

        estimator.update_at(&task, 0, 1000, t0);
        estimator.update_at(&task, 800, 1000, t0 + ms(500));
        assert_eq!(estimator.display_data(&task).progress, 80);

        estimator.reset(&task);
        assert!(estimator.contains(&task));

        assert!(estimator.update_at(&task, 0, 1000, t0 + ms(510)));
        let data = estimator.display_data(&task);
        assert_eq!(data.progress, 0);
        assert_eq!(data.speed, 0.0);
    }

    #[test]
    fn test_clear_and_clear_all() {
        let t0 = Instant::now();
        let a = TaskId::from("a");
        let b = TaskId::from("b");
        let mut estimator = ProgressEstimator::default();

        estimator.update_at(&a, 10, 100, t0);
        estimator.update_at(&b, 10, 100, t0);

        estimator.clear(&a);
        assert!(!estimator.contains(&a));
        assert_eq!(estimator.display_data(&a), DisplayData::default());
        assert_eq!(estimator.len(), 1);

        estimator.clear_all();
        assert!(estimator.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_with_paused_clock() {
        let task = TaskId::from("T1");
        let mut estimator = ProgressEstimator::default();

        assert!(estimator.update(&task, 0, 1000));
        tokio::time::advance(ms(40)).await;
        assert!(!estimator.update(&task, 500, 1000));
        tokio::time::advance(ms(60)).await;
        assert!(estimator.update(&task, 700, 1000));

        let speed = estimator.display_data(&task).speed;
        assert!((speed - 7_000.0).abs() < 1e-6);
    }
}
