//! 增量式 server-sent events 解码
//!
//! 网络分块的边界与事件边界无关，这里按行缓冲，遇到空行才产出一帧。

use bytes::{Buf, BytesMut};
use tracing::warn;

/// 单行长度上限，超过后丢弃整行
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// 一帧 SSE 事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` 字段，缺省为 `message`
    pub event: String,
    /// 多个 `data:` 行用换行拼接
    pub data: String,
}

#[derive(Debug)]
pub struct SseDecoder {
    buf: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    max_line_len: usize,
    /// 正在跳过一条超长行的剩余部分
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            event: None,
            data: Vec::new(),
            max_line_len,
            discarding: false,
        }
    }

    /// 喂入一段字节，返回其中所有完整的帧
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);

        if self.discarding {
            match find_newline(&self.buf) {
                Some(line_end) => {
                    self.buf.advance(line_end + 1);
                    self.discarding = false;
                }
                None => {
                    self.buf.clear();
                    return Vec::new();
                }
            }
        }

        let mut frames = Vec::new();
        while let Some(line_end) = find_newline(&self.buf) {
            let line = self.buf.split_to(line_end);
            self.buf.advance(1);

            let text = String::from_utf8_lossy(&line);
            let text = text.strip_suffix('\r').unwrap_or(text.as_ref());

            if let Some(frame) = self.process_line(text) {
                frames.push(frame);
            }
        }

        if self.buf.len() > self.max_line_len {
            warn!(len = self.buf.len(), limit = self.max_line_len, "sse line too long, dropping frame");
            self.reset();
            self.discarding = true;
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // 注释 / 心跳
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry 由重连策略自行处理
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }

    /// 连接断开时丢弃未完成的帧
    pub fn reset(&mut self) {
        self.buf.clear();
        self.event = None;
        self.data.clear();
        self.discarding = false;
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
