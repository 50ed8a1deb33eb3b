use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(5000);

/// 样本：时间点 + 累计字节数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedSample {
    pub timestamp: Instant,
    pub bytes_total: u64,
}

/// 滑动时间窗口速度计算器
///
/// 只保留 `now - timestamp < window` 的样本，用窗口内最旧与最新样本计算速度。
/// 窗口按时间而不是按个数限制，事件频率变化时无需调参。
#[derive(Debug, Clone)]
pub struct SlidingWindowSpeed {
    samples: VecDeque<SpeedSample>,
    window: Duration,
}

impl Default for SlidingWindowSpeed {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SlidingWindowSpeed {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// 以当前时间添加样本
    pub fn add_sample(&mut self, bytes_total: u64) {
        self.add_sample_at(bytes_total, Instant::now());
    }

    /// 以指定时间添加样本，并淘汰相对该时间已过期的样本
    pub fn add_sample_at(&mut self, bytes_total: u64, timestamp: Instant) {
        self.samples.push_back(SpeedSample {
            timestamp,
            bytes_total,
        });

        while let Some(oldest) = self.samples.front() {
            if timestamp.duration_since(oldest.timestamp) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// 当前速度（字节/秒），样本不足或时间差为 0 时返回 0
    pub fn speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };

        if self.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }

        // 重复或迟到的事件可能让字节数回退
        let bytes = last.bytes_total as f64 - first.bytes_total as f64;
        (bytes / elapsed).max(0.0)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
