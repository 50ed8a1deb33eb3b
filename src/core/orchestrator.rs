use std::collections::HashMap;
use tracing::{debug, info};
use crate::config::TransferConfig;
use crate::notify::{ProgressPayload, TransferEvent};
use crate::progress::ProgressEstimator;
use super::api::CheckUploadResultVO;
use super::errors::{Result, TransferError};
use super::state_machine::apply_transition;
use super::types::{FileTransferTaskVO, TaskId, TaskStatus, TransferTask};

/// 推给 UI 的任务变更
#[derive(Debug, Clone, PartialEq)]
pub enum TransferUpdate {
    /// 新任务
    Added(FileTransferTaskVO),
    /// 状态变更
    StatusChanged {
        from: TaskStatus,
        task: FileTransferTaskVO,
    },
    /// 进度（已节流）
    Progress(FileTransferTaskVO),
    /// 任务被移除
    Removed(TaskId),
}

/// 任务集合与进度估算器的唯一持有者
///
/// 所有状态变更都经过状态机校验；任务记录整条替换，不做原地修改。
#[derive(Debug)]
pub struct TransferOrchestrator {
    tasks: HashMap<TaskId, TransferTask>,
    estimator: ProgressEstimator,
}

impl Default for TransferOrchestrator {
    fn default() -> Self {
        Self::new(&TransferConfig::default())
    }
}

impl TransferOrchestrator {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            estimator: ProgressEstimator::new(config.throttle_interval(), config.speed_window()),
        }
    }

    /// 加入一个新任务
    pub fn insert(&mut self, task: TransferTask) -> Result<TransferUpdate> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(TransferError::internal(format!("Task {} already exists", task.task_id)));
        }

        info!(task_id = %task.task_id, file_name = %task.file_name, file_size = task.file_size, "task added");
        let update = TransferUpdate::Added(FileTransferTaskVO::from(&task));
        self.tasks.insert(task.task_id.clone(), task);

        Ok(update)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TransferTask> {
        self.tasks.get(task_id)
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<FileTransferTaskVO> {
        self.tasks.get(task_id).map(FileTransferTaskVO::from)
    }

    /// 所有任务快照，按创建时间排序
    pub fn snapshots(&self) -> Vec<FileTransferTaskVO> {
        let mut tasks: Vec<_> = self.tasks.values().collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.as_str().cmp(b.task_id.as_str()))
        });

        tasks.into_iter().map(FileTransferTaskVO::from).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn estimator(&self) -> &ProgressEstimator {
        &self.estimator
    }

    /// 状态跳转；同状态返回 `Ok(None)`
    pub fn transition(&mut self, task_id: &TaskId, to: TaskStatus) -> Result<Option<TransferUpdate>> {
        self.transition_with(task_id, to, |_| {})
    }

    /// 重新开始失败的任务
    pub fn restart(&mut self, task_id: &TaskId) -> Result<Option<TransferUpdate>> {
        self.transition(task_id, TaskStatus::Initialized)
    }

    /// 标记失败并记录原因
    pub fn fail(&mut self, task_id: &TaskId, message: impl Into<String>) -> Result<Option<TransferUpdate>> {
        let message = message.into();
        self.transition_with(task_id, TaskStatus::Failed, |task| {
            task.error_message = Some(message);
        })
    }

    /// 根据秒传校验结果推进任务
    pub fn apply_check_result(
        &mut self,
        task_id: &TaskId,
        result: &CheckUploadResultVO,
    ) -> Result<Option<TransferUpdate>> {
        if result.is_quick_upload {
            let file_id = result.file_id.clone();
            info!(task_id = %task_id, "quick upload hit, skipping byte transfer");
            self.transition_with(task_id, TaskStatus::Completed, |task| {
                task.file_id = file_id;
            })
        } else {
            self.transition(task_id, TaskStatus::Uploading)
        }
    }

    /// 应用一条推送事件
    pub fn handle_event(&mut self, event: &TransferEvent) -> Result<Option<TransferUpdate>> {
        match event {
            TransferEvent::Progress { task_id, data } => self.apply_progress(task_id, data),
            TransferEvent::Status { task_id, data } => {
                let message = data.message.clone();
                self.transition_with(task_id, data.status, |task| {
                    if task.status == TaskStatus::Failed {
                        task.error_message = message;
                    }
                })
            }
            TransferEvent::Complete { task_id, data } => {
                let file_id = data.file_id.clone();
                self.transition_with(task_id, TaskStatus::Completed, |task| {
                    task.file_id = Some(file_id);
                })
            }
            TransferEvent::Error { task_id, data } => {
                self.fail(task_id, format!("[{}] {}", data.code, data.message))
            }
        }
    }

    /// 移除任务并释放估算状态
    pub fn remove(&mut self, task_id: &TaskId) -> Option<TransferUpdate> {
        self.estimator.clear(task_id);
        self.tasks
            .remove(task_id)
            .map(|task| TransferUpdate::Removed(task.task_id))
    }

    /// 清理已完成 / 已取消的任务，返回清理数量
    pub fn clear_finished(&mut self) -> Vec<TransferUpdate> {
        let finished: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .map(|task| task.task_id.clone())
            .collect();

        finished
            .iter()
            .filter_map(|task_id| self.remove(task_id))
            .collect()
    }

    fn apply_progress(&mut self, task_id: &TaskId, data: &ProgressPayload) -> Result<Option<TransferUpdate>> {
        let current = self
            .tasks
            .get(task_id)
            .ok_or_else(|| TransferError::TaskNotFound(task_id.clone()))?;

        if !current.status.accepts_progress() {
            debug!(task_id = %task_id, status = %current.status, "ignoring progress for finished task");
            return Ok(None);
        }

        let mut next = current.clone();
        let reported = data.uploaded_bytes.min(next.file_size);
        next.uploaded_bytes = next.uploaded_bytes.max(reported);
        next.uploaded_chunks = next.uploaded_chunks.max(data.uploaded_chunks);
        if data.total_chunks > 0 {
            next.total_chunks = data.total_chunks;
        }

        let total_bytes = if data.total_bytes > 0 {
            data.total_bytes
        } else {
            next.file_size
        };

        // 节流只影响是否推送，记录里的展示数据始终跟随最新字节数
        let should_emit = self.estimator.update(task_id, next.uploaded_bytes, total_bytes);
        next = next.with_display(self.estimator.display_data(task_id));
        if next.status != TaskStatus::Uploading {
            next.speed = 0.0;
            next.remaining_time = 0;
        }

        let update = should_emit.then(|| TransferUpdate::Progress(FileTransferTaskVO::from(&next)));

        self.tasks.insert(task_id.clone(), next);

        Ok(update)
    }

    fn transition_with(
        &mut self,
        task_id: &TaskId,
        to: TaskStatus,
        extra: impl FnOnce(&mut TransferTask),
    ) -> Result<Option<TransferUpdate>> {
        let current = self
            .tasks
            .get(task_id)
            .ok_or_else(|| TransferError::TaskNotFound(task_id.clone()))?;

        let from = current.status;
        if from == to {
            return Ok(None);
        }

        let mut next = apply_transition(current, to)?;
        self.on_enter(&mut next, from);
        extra(&mut next);

        info!(task_id = %task_id, %from, %to, "task status changed");
        let update = TransferUpdate::StatusChanged {
            from,
            task: FileTransferTaskVO::from(&next),
        };
        self.tasks.insert(task_id.clone(), next);

        Ok(Some(update))
    }

    fn on_enter(&mut self, task: &mut TransferTask, from: TaskStatus) {
        match task.status {
            TaskStatus::Completed => {
                self.estimator.clear(&task.task_id);
                task.uploaded_bytes = task.file_size;
                task.uploaded_chunks = task.total_chunks;
                task.progress = 100;
                task.error_message = None;
            }
            TaskStatus::Cancelled | TaskStatus::Failed => {
                self.estimator.clear(&task.task_id);
            }
            TaskStatus::Initialized if from == TaskStatus::Failed => {
                // 进入 failed 时估算状态已释放，这里只需清掉记录上的旧进度
                self.estimator.clear(&task.task_id);
                task.uploaded_bytes = 0;
                task.uploaded_chunks = 0;
                task.progress = 0;
                task.error_message = None;
            }
            _ => {}
        }

        // 只有上传中的任务有速度
        if task.status != TaskStatus::Uploading {
            task.speed = 0.0;
            task.remaining_time = 0;
        }
    }
}
