use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use url::Url;
use crate::core::{Result, TransferError};

/// 推送通道的原始字节流
pub type EventStream = BoxStream<'static, Result<Bytes>>;

/// 推送通道的传输层
#[async_trait]
pub trait EventSource: Send + Sync {
    /// 建立一条长连接，返回响应体字节流
    async fn open(&self, url: &Url) -> Result<EventStream>;
}

/// 基于 reqwest 的 `text/event-stream` 连接
#[derive(Debug, Clone, Default)]
pub struct HttpEventSource {
    client: Client,
}

impl HttpEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 复用外部已配置好（鉴权头、代理等）的客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self, url: &Url) -> Result<EventStream> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::server_error(
                status.as_u16(),
                "Failed to open notification channel",
            ));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from))
            .boxed())
    }
}
