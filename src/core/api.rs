use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use super::errors::Result;
use super::types::TaskId;

/// 初始化上传请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadCmd {
    pub file_name: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub mime_type: String,
}

/// 秒传 / 续传校验请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUploadCmd {
    pub task_id: TaskId,
    pub file_md5: String,
    pub file_name: String,
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUploadResultVO {
    /// 服务端已存在相同内容，无需再传
    pub is_quick_upload: bool,
    #[serde(default)]
    pub file_id: Option<String>,
    pub task_id: TaskId,
    #[serde(default)]
    pub message: Option<String>,
}

/// 上传接口（由外部的 HTTP 客户端实现）
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// 创建上传任务，返回服务端分配的任务 ID
    async fn init_upload(&self, cmd: &InitUploadCmd) -> Result<TaskId>;

    /// 按内容哈希检查是否可以秒传
    async fn check_upload(&self, cmd: &CheckUploadCmd) -> Result<CheckUploadResultVO>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_from_wire() {
        let json = r#"{"isQuickUpload":true,"fileId":"f-1","taskId":"t-1"}"#;
        let result: CheckUploadResultVO = serde_json::from_str(json).unwrap();

        assert!(result.is_quick_upload);
        assert_eq!(result.file_id.as_deref(), Some("f-1"));
        assert_eq!(result.task_id, TaskId::from("t-1"));
        assert!(result.message.is_none());
    }

    #[test]
    fn test_init_cmd_omits_missing_parent() {
        let cmd = InitUploadCmd {
            file_name: "a.txt".to_string(),
            file_size: 3,
            parent_id: None,
            total_chunks: 1,
            chunk_size: 5 * 1024 * 1024,
            mime_type: "text/plain".to_string(),
        };

        let json = serde_json::to_value(&cmd).unwrap();
        assert!(json.get("parentId").is_none());
        assert_eq!(json["totalChunks"], 1);
    }
}
