pub mod config;
pub mod core;
pub mod notify;
pub mod progress;
pub mod utils;

// 重新导出核心类型
pub use config::TransferConfig;
pub use crate::core::{
    TransferManager,
    TransferManagerHandle,
    TransferOrchestrator,
    TransferUpdate,
    TransferTask,
    FileTransferTaskVO,
    TaskId,
    TaskStatus,
    UploadApi,
    TransferError,
    Result,
};

pub use notify::{NotificationClient, ConnectionState, TransferEvent, TransferEventHandler};
pub use progress::{ProgressEstimator, SlidingWindowSpeed};
