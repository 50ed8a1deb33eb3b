mod api;
mod errors;
mod manager;
mod manager_worker;
mod orchestrator;
mod state_machine;
mod types;

pub use api::{CheckUploadCmd, CheckUploadResultVO, InitUploadCmd, UploadApi};
pub use errors::{Result, TransferError};
pub use manager::{TransferManager, TransferManagerHandle};
pub use orchestrator::{TransferOrchestrator, TransferUpdate};
pub use state_machine::{allowed_targets, apply_transition, can_transition};
pub use types::{DisplayData, FileTransferTaskVO, TaskId, TaskStatus, TransferTask};
