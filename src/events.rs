// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! stdout 事件协议 (JSON lines)
//!
//! 每个事件一行, 写完立即 flush, 宿主进程按行解析。

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::models::Detection;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Event {
    Info {
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
    ObjectsDetected {
        timestamp: f64,
        objects: Vec<Detection>,
    },
}

impl Event {
    pub fn provider(name: impl Into<String>) -> Self {
        Self::Info {
            provider: Some(name.into()),
            message: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            provider: None,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// 以当前时间 (epoch秒, 浮点) 打时间戳
    pub fn detected(objects: Vec<Detection>) -> Self {
        let now = chrono::Utc::now();
        Self::ObjectsDetected {
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            objects,
        }
    }
}

/// 事件输出端
pub struct EventWriter<W: Write> {
    out: W,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// 写入失败 (例如宿主关闭了管道) 对调用方是致命的
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl EventWriter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}
