use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::config::TransferConfig;
use crate::notify::{TransferEvent, TransferEventHandler};
use super::api::{InitUploadCmd, UploadApi};
use super::errors::{Result, TransferError};
use super::manager_worker::{ManagerCommand, TransferManagerWorker};
use super::orchestrator::TransferUpdate;
use super::types::{FileTransferTaskVO, TaskId, TaskStatus};

#[derive(Clone)]
pub struct TransferManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    remote_tx: mpsc::UnboundedSender<TransferEvent>,
    event_tx: broadcast::Sender<TransferUpdate>,
}

/// 传输管理器句柄 - 包含管理器和工作任务
pub struct TransferManagerHandle {
    pub manager: TransferManager,
    pub worker_handle: JoinHandle<()>,
}

impl TransferManagerHandle {
    pub async fn shutdown(self) -> Result<()> {
        // 工作任务已经退出时发送会失败，直接等待即可
        let _ = self.manager.command_tx.send(ManagerCommand::Shutdown).await;
        drop(self.manager);

        self.worker_handle
            .await
            .map_err(|err| TransferError::internal(format!("Worker panic: {}", err)))
    }
}

impl TransferManager {
    /// 启动管理器，必须在 tokio 运行时内调用
    pub fn new(config: TransferConfig, api: Arc<dyn UploadApi>) -> TransferManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));

        let worker_handle = tokio::spawn(TransferManagerWorker::run(
            config,
            api,
            command_rx,
            remote_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            remote_tx,
            event_tx,
        };

        TransferManagerHandle {
            manager,
            worker_handle,
        }
    }

    /// 推送通道的回调，事件被转发到管理器的工作循环
    pub fn event_handler(&self) -> Arc<dyn TransferEventHandler> {
        Arc::new(self.remote_tx.clone())
    }

    /// Start upload task
    pub async fn start_upload(&self, cmd: InitUploadCmd, file_md5: impl Into<String>) -> Result<TaskId> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::StartUpload {
            cmd,
            file_md5: file_md5.into(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)?
    }

    /// Pause upload task
    pub async fn pause(&self, task_id: &TaskId) -> Result<()> {
        self.transition(task_id, TaskStatus::Paused).await
    }

    /// Resume upload
    pub async fn resume(&self, task_id: &TaskId) -> Result<()> {
        self.transition(task_id, TaskStatus::Uploading).await
    }

    /// Cancel upload
    pub async fn cancel(&self, task_id: &TaskId) -> Result<()> {
        self.transition(task_id, TaskStatus::Cancelled).await
    }

    /// 失败任务重新开始
    pub async fn restart(&self, task_id: &TaskId) -> Result<()> {
        self.transition(task_id, TaskStatus::Initialized).await
    }

    pub async fn remove(&self, task_id: &TaskId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::Remove {
            task_id: task_id.clone(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)?
    }

    /// Get task
    pub async fn get_task(&self, task_id: &TaskId) -> Result<Option<FileTransferTaskVO>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::GetTask {
            task_id: task_id.clone(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)
    }

    /// Get all tasks
    pub async fn get_all_tasks(&self) -> Result<Vec<FileTransferTaskVO>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::GetAllTasks { reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)
    }

    /// 清除已完成和已取消的任务，返回清除数量
    pub async fn clear_finished(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::ClearFinished { reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)
    }

    /// 订阅任务变更
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 进度事件已经过节流，订阅者拿到的是可以直接渲染的快照
    pub fn subscribe_events(&self) -> broadcast::Receiver<TransferUpdate> {
        self.event_tx.subscribe()
    }

    async fn transition(&self, task_id: &TaskId, to: TaskStatus) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(ManagerCommand::Transition {
            task_id: task_id.clone(),
            to,
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)?
    }

    async fn send(&self, command: ManagerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| TransferError::ManagerShutdown)
    }
}
