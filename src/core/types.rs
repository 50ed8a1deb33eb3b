use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::api::InitUploadCmd;

/// 传输任务唯一标识（由服务端分配，客户端视为不透明字符串）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 本地生成一个随机 ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 刚创建
    Idle,
    /// 服务端已初始化上传会话
    Initialized,
    /// 秒传 / 分片校验中
    Checking,
    /// 上传中
    Uploading,
    /// 已暂停
    Paused,
    /// 服务端合并分片中
    Merging,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        TaskStatus::Idle,
        TaskStatus::Initialized,
        TaskStatus::Checking,
        TaskStatus::Uploading,
        TaskStatus::Paused,
        TaskStatus::Merging,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Initialized => "initialized",
            TaskStatus::Checking => "checking",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Paused => "paused",
            TaskStatus::Merging => "merging",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// 没有任何出边的状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// 不再接收进度更新的状态
    pub fn accepts_progress(&self) -> bool {
        !matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输任务
///
/// 任务被当作不可变值使用：状态变更总是产生一个新的记录，
/// 只有编排器会把新记录写回任务集合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    /// 任务 ID
    pub task_id: TaskId,
    /// 文件名
    pub file_name: String,
    /// 文件大小（字节）
    pub file_size: u64,
    /// MIME 类型
    pub mime_type: String,
    /// 目标目录
    pub parent_id: Option<String>,
    /// 分片总数
    pub total_chunks: u32,
    /// 已上传分片数
    pub uploaded_chunks: u32,
    /// 分片大小
    pub chunk_size: u64,
    /// 文件内容 MD5，用于秒传 / 续传
    pub file_md5: Option<String>,
    /// 当前状态
    pub status: TaskStatus,
    /// 进度百分比 0-100
    pub progress: u8,
    /// 已上传字节数
    pub uploaded_bytes: u64,
    /// 当前速度（字节/秒）
    pub speed: f64,
    /// 预计剩余时间（秒）
    pub remaining_time: u64,
    /// 错误信息，只在 failed 时存在
    pub error_message: Option<String>,
    /// 完成后服务端返回的文件 ID
    pub file_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferTask {
    pub fn new(task_id: TaskId, cmd: &InitUploadCmd) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            file_name: cmd.file_name.clone(),
            file_size: cmd.file_size,
            mime_type: cmd.mime_type.clone(),
            parent_id: cmd.parent_id.clone(),
            total_chunks: cmd.total_chunks,
            uploaded_chunks: 0,
            chunk_size: cmd.chunk_size,
            file_md5: None,
            status: TaskStatus::Idle,
            progress: 0,
            uploaded_bytes: 0,
            speed: 0.0,
            remaining_time: 0,
            error_message: None,
            file_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 应用一份展示数据
    pub(crate) fn with_display(mut self, display: DisplayData) -> Self {
        self.progress = display.progress;
        self.speed = display.speed;
        self.remaining_time = display.remaining_time;
        self
    }
}

/// 进度估算器对外输出的展示数据
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplayData {
    /// 百分比（取整，0-100，单调不减）
    pub progress: u8,
    /// 速度（字节/秒，≥ 0）
    pub speed: f64,
    /// 剩余时间（秒）
    pub remaining_time: u64,
}

/// 提供给 UI 的只读任务快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferTaskVO {
    pub task_id: TaskId,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub parent_id: Option<String>,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub chunk_size: u64,
    pub status: TaskStatus,
    pub uploaded_bytes: u64,
    pub progress: u8,
    pub speed: f64,
    pub remain_time: u64,
    pub file_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TransferTask> for FileTransferTaskVO {
    fn from(task: &TransferTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            file_name: task.file_name.clone(),
            file_size: task.file_size,
            mime_type: task.mime_type.clone(),
            parent_id: task.parent_id.clone(),
            total_chunks: task.total_chunks,
            uploaded_chunks: task.uploaded_chunks,
            chunk_size: task.chunk_size,
            status: task.status,
            // 展示层再次兜底，防止越界的字节数
            uploaded_bytes: task.uploaded_bytes.min(task.file_size),
            progress: task.progress.min(100),
            speed: task.speed.max(0.0),
            remain_time: task.remaining_time,
            file_id: task.file_id.clone(),
            error_message: task.error_message.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}
