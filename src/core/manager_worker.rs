use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use crate::config::TransferConfig;
use crate::notify::TransferEvent;
use super::api::{CheckUploadCmd, CheckUploadResultVO, InitUploadCmd, UploadApi};
use super::errors::{Result, TransferError};
use super::orchestrator::{TransferOrchestrator, TransferUpdate};
use super::types::{FileTransferTaskVO, TaskId, TaskStatus, TransferTask};

/// 管理器命令
pub(crate) enum ManagerCommand {
    /// 初始化并校验一个上传任务
    StartUpload {
        cmd: InitUploadCmd,
        file_md5: String,
        reply: oneshot::Sender<Result<TaskId>>,
    },

    /// 用户发起的状态变更（暂停 / 继续 / 取消 / 重试）
    Transition {
        task_id: TaskId,
        to: TaskStatus,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 移除任务
    Remove {
        task_id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 获取任务信息
    GetTask {
        task_id: TaskId,
        reply: oneshot::Sender<Option<FileTransferTaskVO>>,
    },

    /// 获取所有任务
    GetAllTasks {
        reply: oneshot::Sender<Vec<FileTransferTaskVO>>,
    },

    /// 清除所有 <Completed/Cancelled> 状态的任务
    ClearFinished {
        reply: oneshot::Sender<usize>,
    },

    /// 关闭管理器
    Shutdown,
}

/// 上传接口调用的结果，由后台任务送回工作循环
enum ApiOutcome {
    Initialized {
        cmd: InitUploadCmd,
        file_md5: String,
        result: Result<TaskId>,
        reply: oneshot::Sender<Result<TaskId>>,
    },
    Checked {
        task_id: TaskId,
        result: Result<CheckUploadResultVO>,
        reply: oneshot::Sender<Result<TaskId>>,
    },
}

/// 唯一修改任务状态的地方：命令和推送事件在同一个循环里按到达顺序处理
///
/// 上传接口的请求在后台任务里等待，结果再送回循环，慢请求不会挡住其它任务的事件。
pub(crate) struct TransferManagerWorker {
    api: Arc<dyn UploadApi>,
    orchestrator: TransferOrchestrator,
    event_tx: broadcast::Sender<TransferUpdate>,
    outcome_tx: mpsc::UnboundedSender<ApiOutcome>,
}

impl TransferManagerWorker {
    pub(crate) async fn run(
        config: TransferConfig,
        api: Arc<dyn UploadApi>,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        mut remote_rx: mpsc::UnboundedReceiver<TransferEvent>,
        event_tx: broadcast::Sender<TransferUpdate>,
    ) {
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            api,
            orchestrator: TransferOrchestrator::new(&config),
            event_tx,
            outcome_tx,
        };

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        // 所有句柄都已释放时同样退出
                        Some(ManagerCommand::Shutdown) | None => break,
                        Some(command) => worker.handle_command(command),
                    }
                }
                Some(event) = remote_rx.recv() => {
                    worker.handle_remote(event);
                }
                Some(outcome) = outcome_rx.recv() => {
                    worker.handle_outcome(outcome);
                }
            }
        }

        debug!(tasks = worker.orchestrator.len(), "transfer manager worker stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::StartUpload { cmd, file_md5, reply } => {
                self.spawn_init(cmd, file_md5, reply);
            }
            ManagerCommand::Transition { task_id, to, reply } => {
                let result = self.orchestrator.transition(&task_id, to).map(|update| self.emit(update));
                let _ = reply.send(result);
            }
            ManagerCommand::Remove { task_id, reply } => {
                let result = match self.orchestrator.remove(&task_id) {
                    Some(update) => {
                        self.emit(Some(update));
                        Ok(())
                    }
                    None => Err(TransferError::TaskNotFound(task_id)),
                };
                let _ = reply.send(result);
            }
            ManagerCommand::GetTask { task_id, reply } => {
                let _ = reply.send(self.orchestrator.snapshot(&task_id));
            }
            ManagerCommand::GetAllTasks { reply } => {
                let _ = reply.send(self.orchestrator.snapshots());
            }
            ManagerCommand::ClearFinished { reply } => {
                let removed = self.orchestrator.clear_finished();
                let count = removed.len();
                for update in removed {
                    self.emit(Some(update));
                }
                let _ = reply.send(count);
            }
            ManagerCommand::Shutdown => {}
        }
    }

    fn handle_outcome(&mut self, outcome: ApiOutcome) {
        match outcome {
            ApiOutcome::Initialized { cmd, file_md5, result, reply } => {
                match result.and_then(|task_id| self.create_task(task_id, &cmd, &file_md5)) {
                    Ok(task_id) => self.spawn_check(task_id, cmd.file_name, file_md5, reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            ApiOutcome::Checked { task_id, result, reply } => {
                let applied = match result {
                    Ok(result) => self.orchestrator.apply_check_result(&task_id, &result),
                    Err(err) => {
                        warn!(task_id = %task_id, %err, "upload check failed");
                        self.orchestrator.fail(&task_id, err.to_string())
                    }
                };

                match applied {
                    Ok(update) => self.emit(update),
                    // 校验期间任务被取消或移除
                    Err(err) => debug!(task_id = %task_id, %err, "check result discarded"),
                }
                let _ = reply.send(Ok(task_id));
            }
        }
    }

    fn spawn_init(&self, cmd: InitUploadCmd, file_md5: String, reply: oneshot::Sender<Result<TaskId>>) {
        let api = self.api.clone();
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result = api.init_upload(&cmd).await;
            let _ = outcome_tx.send(ApiOutcome::Initialized {
                cmd,
                file_md5,
                result,
                reply,
            });
        });
    }

    fn spawn_check(
        &self,
        task_id: TaskId,
        file_name: String,
        file_md5: String,
        reply: oneshot::Sender<Result<TaskId>>,
    ) {
        let api = self.api.clone();
        let outcome_tx = self.outcome_tx.clone();
        let check = CheckUploadCmd {
            task_id: task_id.clone(),
            file_md5,
            file_name,
        };

        tokio::spawn(async move {
            let result = api.check_upload(&check).await;
            let _ = outcome_tx.send(ApiOutcome::Checked {
                task_id,
                result,
                reply,
            });
        });
    }

    fn create_task(&mut self, task_id: TaskId, cmd: &InitUploadCmd, file_md5: &str) -> Result<TaskId> {
        let mut task = TransferTask::new(task_id.clone(), cmd);
        task.file_md5 = Some(file_md5.to_string());
        let added = self.orchestrator.insert(task)?;
        self.emit(Some(added));

        for to in [TaskStatus::Initialized, TaskStatus::Checking] {
            let update = self.orchestrator.transition(&task_id, to)?;
            self.emit(update);
        }

        Ok(task_id)
    }

    fn handle_remote(&mut self, event: TransferEvent) {
        match self.orchestrator.handle_event(&event) {
            Ok(update) => self.emit(update),
            Err(TransferError::TaskNotFound(task_id)) => {
                debug!(task_id = %task_id, kind = event.kind(), "event for unknown task");
            }
            Err(err) => {
                warn!(task_id = %event.task_id(), kind = event.kind(), %err, "rejected transfer event");
            }
        }
    }

    fn emit(&self, update: Option<TransferUpdate>) {
        if let Some(update) = update {
            // 没有订阅者时发送失败是正常的
            let _ = self.event_tx.send(update);
        }
    }
}
