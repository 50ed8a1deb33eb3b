use std::sync::Arc;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use crate::config::TransferConfig;
use crate::core::Result;
use crate::utils::ReconnectPolicy;
use super::event::TransferEvent;
use super::handler::{dispatch, TransferEventHandler};
use super::source::{EventSource, EventStream, HttpEventSource};
use super::sse::SseDecoder;

/// 推送连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 从未连接
    Idle,
    /// 首次连接中
    Connecting,
    /// 已连接
    Open,
    /// 等待第 `attempt` 次重连
    Reconnecting { attempt: u32 },
    /// 已断开（主动断开或重连次数耗尽）
    Closed,
}

struct Connection {
    user_id: String,
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

/// 推送通道客户端
///
/// 每个实例最多持有一条连接，`connect` 与 `disconnect` 成对使用。
/// 客户端只负责解码和分发事件，从不直接修改任务状态。
pub struct NotificationClient {
    config: TransferConfig,
    source: Arc<dyn EventSource>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    connection: Option<Connection>,
}

impl NotificationClient {
    pub fn new(config: TransferConfig) -> Self {
        Self::with_source(config, Arc::new(HttpEventSource::new()))
    }

    pub fn with_source(config: TransferConfig, source: Arc<dyn EventSource>) -> Self {
        let policy = config.reconnect_policy();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            config,
            source,
            policy,
            state_tx,
            connection: None,
        }
    }

    /// 以某个用户身份建立连接，已有连接会先被断开
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn connect(&mut self, user_id: &str, handler: Arc<dyn TransferEventHandler>) -> Result<()> {
        self.disconnect();

        let url = self.config.notification_url(user_id)?;
        let cancellation_token = CancellationToken::new();

        let worker = ConnectionWorker {
            source: self.source.clone(),
            url,
            policy: self.policy,
            handler,
            cancellation_token: cancellation_token.clone(),
            state_tx: self.state_tx.clone(),
        };

        info!(user_id, "connecting notification channel");
        self.state_tx.send_replace(ConnectionState::Connecting);
        let join_handle = tokio::spawn(worker.run());

        self.connection = Some(Connection {
            user_id: user_id.to_string(),
            cancellation_token,
            join_handle,
        });

        Ok(())
    }

    /// 立即断开，不等待进行中的网络操作
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancellation_token.cancel();
            connection.join_handle.abort();
            self.state_tx.send_replace(ConnectionState::Closed);
            info!(user_id = %connection.user_id, "notification channel disconnected");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// 订阅连接状态变化，上层可以据此实现存活检测
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.user_id.as_str())
    }
}

impl Drop for NotificationClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct ConnectionWorker {
    source: Arc<dyn EventSource>,
    url: Url,
    policy: ReconnectPolicy,
    handler: Arc<dyn TransferEventHandler>,
    cancellation_token: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionWorker {
    async fn run(self) {
        let mut attempts: u32 = 0;

        loop {
            let opened = tokio::select! {
                _ = self.cancellation_token.cancelled() => return,
                opened = self.source.open(&self.url) => opened,
            };

            match opened {
                Ok(stream) => {
                    attempts = 0;
                    self.set_state(ConnectionState::Open);
                    info!(url = %self.url, "notification channel open");

                    match self.pump(stream).await {
                        Ok(()) => warn!("notification channel closed by server"),
                        Err(err) => warn!(%err, "notification channel failed"),
                    }
                }
                Err(err) => warn!(%err, "failed to open notification channel"),
            }

            if self.cancellation_token.is_cancelled() {
                return;
            }

            attempts += 1;
            let Some(delay) = self.policy.delay_for(attempts) else {
                error!(
                    max_attempts = self.policy.max_attempts(),
                    "notification channel reconnect attempts exhausted"
                );
                self.set_state(ConnectionState::Closed);
                return;
            };

            self.set_state(ConnectionState::Reconnecting { attempt: attempts });
            warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, "reconnecting notification channel");

            tokio::select! {
                _ = self.cancellation_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 读取直到流结束；流结束返回 Ok，传输错误返回 Err
    async fn pump(&self, mut stream: EventStream) -> Result<()> {
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                _ = self.cancellation_token.cancelled() => return Ok(()),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for frame in decoder.push(&chunk) {
                        match TransferEvent::from_frame(&frame) {
                            Ok(Some(event)) => {
                                dispatch(self.handler.as_ref(), &event);
                            }
                            Ok(None) => debug!(event = %frame.event, "ignoring unrecognised event"),
                            Err(err) => warn!(%err, "dropping malformed event"),
                        }
                    }
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(()),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        // 已断开的旧连接不能覆盖新状态
        if !self.cancellation_token.is_cancelled() {
            self.state_tx.send_replace(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use crate::core::{TaskId, TransferError};

    enum Step {
        Fail,
        Stream(Vec<&'static str>),
        Pending,
    }

    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Step>>,
        opens: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                ..Default::default()
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn open(&self, url: &Url) -> Result<EventStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());

            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Fail);
            match step {
                Step::Fail => Err(TransferError::server_error(503, "unavailable")),
                Step::Stream(chunks) => Ok(futures_util::stream::iter(
                    chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))),
                )
                .boxed()),
                Step::Pending => Ok(futures_util::stream::pending().boxed()),
            }
        }
    }

    async fn wait_closed(client: &NotificationClient) {
        let mut rx = client.subscribe_state();
        rx.wait_for(|state| *state == ConnectionState::Closed).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let source = ScriptedSource::new(vec![]);
        let mut client = NotificationClient::with_source(TransferConfig::default(), source.clone());
        let (tx, _rx) = mpsc::unbounded_channel::<TransferEvent>();

        let start = Instant::now();
        client.connect("u1", Arc::new(tx)).unwrap();
        wait_closed(&client).await;

        // 1 次首连 + 5 次重连，第 6 次失败后不再重试
        assert_eq!(source.opens(), 6);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2 + 4 + 6 + 8 + 10));
        assert!(elapsed < Duration::from_secs(31));

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(source.opens(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let source = ScriptedSource::new(vec![Step::Fail, Step::Fail, Step::Stream(vec![])]);
        let mut client = NotificationClient::with_source(TransferConfig::default(), source.clone());
        let (tx, _rx) = mpsc::unbounded_channel::<TransferEvent>();

        client.connect("u1", Arc::new(tx)).unwrap();
        wait_closed(&client).await;

        assert_eq!(source.opens(), 3 + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_dispatched_and_bad_ones_dropped() {
        let source = ScriptedSource::new(vec![Step::Stream(vec![
            "event: progress\ndata: {\"taskId\":\"t1\",\"uploadedBytes\":10,\"totalBytes\":100}\n\n",
            "event: progress\ndata: {\"uploadedBytes\":20,\"totalBytes\":100}\n\n",
            "event: status\ndata: {not json\n\n: keep-alive\n\n",
            "event: status\ndata: {\"taskId\":\"t1\",\"status\":\"paused\"}\n",
            "\n",
        ]), Step::Pending]);
        let mut client = NotificationClient::with_source(TransferConfig::default(), source.clone());
        let (tx, mut rx) = mpsc::unbounded_channel::<TransferEvent>();

        client.connect("u1", Arc::new(tx)).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, TransferEvent::Progress { ref data, .. } if data.uploaded_bytes == 10));
        assert!(matches!(second, TransferEvent::Status { .. }));
        assert_eq!(second.task_id(), &TaskId::from("t1"));

        // 流结束后重连，第二次连接一直挂起
        let mut state = client.subscribe_state();
        state.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. })).await.unwrap();
        state.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
        assert_eq!(source.opens(), 2);
        assert!(rx.try_recv().is_err());

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_replaces_existing_connection() {
        let source = ScriptedSource::new(vec![Step::Pending, Step::Pending]);
        let mut client = NotificationClient::with_source(TransferConfig::default(), source.clone());
        let (tx, _rx) = mpsc::unbounded_channel::<TransferEvent>();
        let handler: Arc<dyn TransferEventHandler> = Arc::new(tx);

        client.connect("alice", handler.clone()).unwrap();
        client.subscribe_state().wait_for(|s| *s == ConnectionState::Open).await.unwrap();

        client.connect("bob", handler).unwrap();
        assert_eq!(client.user_id(), Some("bob"));
        client.subscribe_state().wait_for(|s| *s == ConnectionState::Open).await.unwrap();

        let urls = source.urls.lock().unwrap().clone();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("userId=alice"));
        assert!(urls[1].ends_with("userId=bob"));

        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.user_id(), None);

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(source.opens(), 2);
    }
}
