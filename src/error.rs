// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error taxonomy)
//!
//! - Connection:   视频流打开/读取失败 → 重连
//! - ModelLoad:    任何推理后端都无法创建会话 → 进程退出
//! - InvalidFrame: 非法帧进入预处理 → 跳过该帧
//! - ConfigDecode: 配置解码失败 → 使用默认配置

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot open video stream {source_name}: {reason}")]
    Connection { source_name: String, reason: String },

    #[error("Failed to load ONNX model or provider: {0}")]
    ModelLoad(String),

    #[error("invalid frame {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("invalid analytics config: {0}")]
    ConfigDecode(String),

    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("unexpected tensor shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("resize failed: {0}")]
    Resize(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn connection(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否只需丢弃当前帧 (不触发重连)
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::InvalidFrame { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
