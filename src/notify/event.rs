use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use crate::core::{Result, TaskId, TaskStatus, TransferError};
use super::sse::SseFrame;

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    #[serde(default)]
    pub uploaded_chunks: u32,
    #[serde(default)]
    pub total_chunks: u32,
}

/// 状态事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: TaskStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// 完成事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
}

/// 错误事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// 服务端有时发数字，有时发字符串
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    pub message: String,
}

/// 推送通道上的类型化事件
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress {
        task_id: TaskId,
        data: ProgressPayload,
    },
    Status {
        task_id: TaskId,
        data: StatusPayload,
    },
    Complete {
        task_id: TaskId,
        data: CompletePayload,
    },
    Error {
        task_id: TaskId,
        data: ErrorPayload,
    },
}

/// 所有事件都必须携带 taskId
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(flatten)]
    data: T,
}

impl TransferEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TransferEvent::Progress { task_id, .. }
            | TransferEvent::Status { task_id, .. }
            | TransferEvent::Complete { task_id, .. }
            | TransferEvent::Error { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransferEvent::Progress { .. } => "progress",
            TransferEvent::Status { .. } => "status",
            TransferEvent::Complete { .. } => "complete",
            TransferEvent::Error { .. } => "error",
        }
    }

    /// 从一帧 SSE 解码
    ///
    /// 未识别的事件名返回 `Ok(None)`；负载无法解析或缺少 taskId 返回
    /// [`TransferError::MalformedEvent`]。
    pub fn from_frame(frame: &SseFrame) -> Result<Option<Self>> {
        let event = match frame.event.as_str() {
            "progress" => {
                let (task_id, data) = decode(&frame.event, &frame.data)?;
                TransferEvent::Progress { task_id, data }
            }
            "status" => {
                let (task_id, data) = decode(&frame.event, &frame.data)?;
                TransferEvent::Status { task_id, data }
            }
            "complete" => {
                let (task_id, data) = decode(&frame.event, &frame.data)?;
                TransferEvent::Complete { task_id, data }
            }
            "error" => {
                let (task_id, data) = decode(&frame.event, &frame.data)?;
                TransferEvent::Error { task_id, data }
            }
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}

fn decode<T: DeserializeOwned>(kind: &str, raw: &str) -> Result<(TaskId, T)> {
    let envelope: Envelope<T> = serde_json::from_str(raw)
        .map_err(|err| TransferError::MalformedEvent(format!("{kind}: {err}")))?;

    match envelope.task_id {
        Some(task_id) if !task_id.is_empty() => Ok((TaskId::from(task_id), envelope.data)),
        _ => Err(TransferError::MalformedEvent(format!("{kind}: missing taskId"))),
    }
}

fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    match Code::deserialize(deserializer) {
        Ok(Code::Number(code)) => Ok(code.to_string()),
        Ok(Code::Text(code)) => Ok(code),
        Err(_) => Err(de::Error::custom("error code must be a number or a string")),
    }
}
