use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use url::Url;
use crate::core::{Result, TransferError};
use crate::utils::ReconnectPolicy;

/// 推送通道路径
pub const SSE_PATH: &str = "/apis/transfer/sse";

/// 传输中心配置
///
/// 时间字段统一以毫秒存储，缺省字段使用默认值，因此空的 TOML 也是合法配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// 服务端地址
    pub base_url: String,
    /// UI 更新节流间隔
    pub throttle_interval_ms: u64,
    /// 速度计算窗口
    pub speed_window_ms: u64,
    /// 最大重连次数
    pub reconnect_max_attempts: u32,
    /// 重连基础延迟，第 n 次重连等待 n 倍
    pub reconnect_base_delay_ms: u64,
    /// 管理器事件广播缓冲
    pub event_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            throttle_interval_ms: 100,
            speed_window_ms: 5000,
            reconnect_max_attempts: 5,
            reconnect_base_delay_ms: 2000,
            event_buffer: 256,
        }
    }
}

impl TransferConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.speed_window_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect_max_attempts,
            Duration::from_millis(self.reconnect_base_delay_ms),
        )
    }

    /// `<base>/apis/transfer/sse?userId=<id>`
    pub fn notification_url(&self, user_id: &str) -> Result<Url> {
        let base = self.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, SSE_PATH))
            .map_err(|err| TransferError::internal(format!("Invalid base url {:?}: {}", self.base_url, err)))?;

        url.query_pairs_mut().append_pair("userId", user_id);

        Ok(url)
    }
}
