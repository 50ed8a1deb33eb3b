use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::{debug, error};
use crate::core::TaskId;
use super::event::{CompletePayload, ErrorPayload, ProgressPayload, StatusPayload, TransferEvent};

/// 推送事件回调
///
/// 回调在接收循环里同步执行，不能阻塞；需要做耗时工作时应转发到别的任务。
/// 回调内的 panic 会在分发处被捕获并记录，不会中断接收循环。
pub trait TransferEventHandler: Send + Sync {
    fn on_progress(&self, _task_id: &TaskId, _data: &ProgressPayload) {}

    fn on_status(&self, _task_id: &TaskId, _data: &StatusPayload) {}

    fn on_complete(&self, _task_id: &TaskId, _data: &CompletePayload) {}

    fn on_error(&self, _task_id: &TaskId, _data: &ErrorPayload) {}
}

/// 直接把事件转发到通道，由接收方异步处理
impl TransferEventHandler for mpsc::UnboundedSender<TransferEvent> {
    fn on_progress(&self, task_id: &TaskId, data: &ProgressPayload) {
        forward(self, TransferEvent::Progress { task_id: task_id.clone(), data: data.clone() });
    }

    fn on_status(&self, task_id: &TaskId, data: &StatusPayload) {
        forward(self, TransferEvent::Status { task_id: task_id.clone(), data: data.clone() });
    }

    fn on_complete(&self, task_id: &TaskId, data: &CompletePayload) {
        forward(self, TransferEvent::Complete { task_id: task_id.clone(), data: data.clone() });
    }

    fn on_error(&self, task_id: &TaskId, data: &ErrorPayload) {
        forward(self, TransferEvent::Error { task_id: task_id.clone(), data: data.clone() });
    }
}

fn forward(tx: &mpsc::UnboundedSender<TransferEvent>, event: TransferEvent) {
    if tx.send(event).is_err() {
        debug!("transfer event receiver dropped");
    }
}

/// 把事件路由到对应回调，返回回调是否正常结束
pub fn dispatch(handler: &dyn TransferEventHandler, event: &TransferEvent) -> bool {
    let result = panic::catch_unwind(AssertUnwindSafe(|| match event {
        TransferEvent::Progress { task_id, data } => handler.on_progress(task_id, data),
        TransferEvent::Status { task_id, data } => handler.on_status(task_id, data),
        TransferEvent::Complete { task_id, data } => handler.on_complete(task_id, data),
        TransferEvent::Error { task_id, data } => handler.on_error(task_id, data),
    }));

    if result.is_err() {
        error!(
            task_id = %event.task_id(),
            kind = event.kind(),
            "transfer event handler panicked"
        );
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::core::TaskStatus;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl TransferEventHandler for Recorder {
        fn on_progress(&self, task_id: &TaskId, data: &ProgressPayload) {
            self.calls.lock().unwrap().push(format!("progress:{task_id}:{}", data.uploaded_bytes));
        }

        fn on_status(&self, task_id: &TaskId, data: &StatusPayload) {
            if data.status == TaskStatus::Failed {
                panic!("handler bug");
            }
            self.calls.lock().unwrap().push(format!("status:{task_id}:{}", data.status));
        }
    }

    #[test]
    fn test_routes_by_kind() {
        let recorder = Recorder::default();
        let event = TransferEvent::Progress {
            task_id: TaskId::from("t1"),
            data: ProgressPayload {
                uploaded_bytes: 10,
                total_bytes: 20,
                uploaded_chunks: 0,
                total_chunks: 0,
            },
        };

        assert!(dispatch(&recorder, &event));
        // 未实现的回调走默认空实现
        assert!(dispatch(
            &recorder,
            &TransferEvent::Complete {
                task_id: TaskId::from("t1"),
                data: CompletePayload {
                    file_id: "f".to_string(),
                    file_name: "a".to_string(),
                    file_size: 20,
                },
            }
        ));

        assert_eq!(*recorder.calls.lock().unwrap(), vec!["progress:t1:10".to_string()]);
    }

    #[test]
    fn test_panic_is_contained() {
        let recorder = Recorder::default();
        let failing = TransferEvent::Status {
            task_id: TaskId::from("t1"),
            data: StatusPayload {
                status: TaskStatus::Failed,
                message: None,
            },
        };
        let ok = TransferEvent::Status {
            task_id: TaskId::from("t1"),
            data: StatusPayload {
                status: TaskStatus::Paused,
                message: None,
            },
        };

        assert!(!dispatch(&recorder, &failing));
        assert!(dispatch(&recorder, &ok));
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["status:t1:paused".to_string()]);
    }
}
