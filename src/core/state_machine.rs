//! 任务状态机
//!
//! 所有状态变更都必须经过这里，乱序或重复的推送事件因此无法把任务带入非法状态
//! （例如 completed -> uploading）。

use chrono::Utc;
use super::errors::{Result, TransferError};
use super::types::{TaskStatus, TransferTask};

/// 某个状态允许跳转到的目标状态
pub fn allowed_targets(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;

    match from {
        Idle => &[Initialized],
        Initialized => &[Checking, Failed, Cancelled],
        // checking -> completed 对应秒传
        Checking => &[Uploading, Completed, Failed, Cancelled],
        Uploading => &[Paused, Merging, Failed, Cancelled],
        Paused => &[Uploading, Cancelled],
        Merging => &[Completed, Failed],
        Completed => &[],
        Failed => &[Initialized],
        Cancelled => &[],
    }
}

/// 同状态跳转视为幂等的空操作，总是允许
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    from == to || allowed_targets(from).contains(&to)
}

/// 返回应用了新状态的任务副本，不修改输入
///
/// 同状态时原样返回（不刷新 `updated_at`）；非法跳转返回
/// [`TransferError::IllegalTransition`]。
pub fn apply_transition(task: &TransferTask, to: TaskStatus) -> Result<TransferTask> {
    let from = task.status;

    if from == to {
        return Ok(task.clone());
    }

    if !can_transition(from, to) {
        return Err(TransferError::IllegalTransition { from, to });
    }

    let mut next = task.clone();
    next.status = to;
    next.updated_at = Utc::now();

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::api::InitUploadCmd;
    use crate::core::types::TaskId;

    fn task_in(status: TaskStatus) -> TransferTask {
        let cmd = InitUploadCmd {
            file_name: "movie.mkv".to_string(),
            file_size: 1024,
            parent_id: Some("root".to_string()),
            total_chunks: 4,
            chunk_size: 256,
            mime_type: "video/x-matroska".to_string(),
        };
        let mut task = TransferTask::new(TaskId::generate(), &cmd);
        task.status = status;
        task
    }

    #[test]
    fn test_transfer_state_transition() {
        use TaskStatus::*;

        // valid
        assert!(can_transition(Idle, Initialized));
        assert!(can_transition(Initialized, Checking));
        assert!(can_transition(Checking, Completed));
        assert!(can_transition(Uploading, Paused));
        assert!(can_transition(Paused, Uploading));
        assert!(can_transition(Merging, Completed));
        assert!(can_transition(Failed, Initialized));

        // invalid
        assert!(!can_transition(Completed, Uploading));
        assert!(!can_transition(Failed, Uploading));
        assert!(!can_transition(Uploading, Completed));
        assert!(!can_transition(Paused, Merging));
        assert!(!can_transition(Cancelled, Initialized));
        assert!(!can_transition(Idle, Uploading));
    }

    #[test]
    fn test_same_state_is_noop() {
        for status in TaskStatus::ALL {
            assert!(can_transition(status, status));

            let task = task_in(status);
            let next = apply_transition(&task, status).unwrap();
            assert_eq!(next, task);
            assert_eq!(next.updated_at, task.updated_at);
        }
    }

    #[test]
    fn test_illegal_pairs_are_rejected_without_mutation() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                if from == to || allowed_targets(from).contains(&to) {
                    continue;
                }

                assert!(!can_transition(from, to), "{from} -> {to}");

                let task = task_in(from);
                let before = task.clone();
                let err = apply_transition(&task, to).unwrap_err();
                assert!(matches!(
                    err,
                    TransferError::IllegalTransition { from: f, to: t } if f == from && t == to
                ));
                assert_eq!(task, before);
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        assert!(allowed_targets(TaskStatus::Completed).is_empty());
        assert!(allowed_targets(TaskStatus::Cancelled).is_empty());
    }

    #[test]
    fn test_upload_lifecycle() {
        use TaskStatus::*;

        let mut task = task_in(Uploading);
        for to in [Paused, Uploading, Merging, Completed] {
            let next = apply_transition(&task, to).unwrap();
            assert_eq!(next.status, to);
            assert!(next.updated_at >= task.updated_at);
            task = next;
        }

        assert!(apply_transition(&task, Uploading).is_err());
        assert_eq!(task.status, Completed);
    }
}
