mod client;
mod event;
mod handler;
mod source;
mod sse;

pub use client::{ConnectionState, NotificationClient};
pub use event::{CompletePayload, ErrorPayload, ProgressPayload, StatusPayload, TransferEvent};
pub use handler::{dispatch, TransferEventHandler};
pub use source::{EventSource, EventStream, HttpEventSource};
pub use sse::{SseDecoder, SseFrame};
