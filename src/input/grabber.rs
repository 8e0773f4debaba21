// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧采集器 (FrameGrabber)
//!
//! 独立线程不停读帧, 只保留最新一帧; 检测循环通过 `read()` 非阻塞获取。
//! 读取失败或流结束时线程自行退出并标记 stopped, 不在内部重试。

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::Result;

use super::frame::{FrameSink, FrameSlot, Snapshot};

/// 视频源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// RTSP/HTTP/文件地址
    Url(String),
    /// 本地摄像头序号
    Device(usize),
}

impl StreamSource {
    /// 纯数字视为摄像头序号
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<usize>() {
            Ok(index) => Self::Device(index),
            Err(_) => Self::Url(raw.to_string()),
        }
    }
}

impl std::fmt::Display for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Device(index) => write!(f, "camera #{index}"),
        }
    }
}

/// 已打开的视频流, `pump` 在采集线程上运行直到流结束/出错/收到停止请求
pub trait FrameStream: Send + 'static {
    fn pump(self) -> Result<()>;
}

/// 视频流后端: 同步打开, 连接失败立即返回 `Connection` 错误
pub trait StreamBackend {
    type Stream: FrameStream;

    fn open(&self, source: &StreamSource, sink: FrameSink) -> Result<Self::Stream>;
}

// 采集线程退出 (含 panic) 时标记 stopped
struct StoppedGuard(Arc<FrameSlot>);

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

pub struct FrameGrabber<S: FrameStream> {
    source: StreamSource,
    slot: Arc<FrameSlot>,
    pending: Option<S>,
    worker: Option<JoinHandle<()>>,
}

impl<S: FrameStream> FrameGrabber<S> {
    pub fn open<B>(backend: &B, source: &StreamSource) -> Result<Self>
    where
        B: StreamBackend<Stream = S>,
    {
        let slot = Arc::new(FrameSlot::default());
        let stream = backend.open(source, FrameSink::new(slot.clone()))?;
        Ok(Self {
            source: source.clone(),
            slot,
            pending: Some(stream),
            worker: None,
        })
    }

    /// 启动采集线程 (重复调用无效)
    pub fn start(&mut self) -> Result<()> {
        let Some(stream) = self.pending.take() else {
            return Ok(());
        };
        let guard = StoppedGuard(self.slot.clone());
        let source = self.source.clone();
        let handle = thread::Builder::new()
            .name("frame-grabber".into())
            .spawn(move || {
                let _guard = guard;
                match stream.pump() {
                    Ok(()) => tracing::info!("📹 视频流结束: {source}"),
                    Err(e) => tracing::warn!("❌ 视频流读取失败: {e}"),
                }
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// 最新帧 (非阻塞)
    pub fn read(&self) -> Option<Snapshot> {
        self.slot.read()
    }

    pub fn is_stopped(&self) -> bool {
        self.slot.is_stopped()
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    /// 请求停止并等待采集线程退出; 返回后流资源已释放
    pub fn stop(&mut self) {
        self.slot.request_stop();
        // 未启动的流直接丢弃
        self.pending.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("❌ 采集线程 panic");
            }
        }
        self.slot.mark_stopped();
    }
}

impl<S: FrameStream> Drop for FrameGrabber<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_sources_are_devices() {
        assert_eq!(StreamSource::parse("0"), StreamSource::Device(0));
        assert_eq!(StreamSource::parse(" 2 "), StreamSource::Device(2));
        assert_eq!(
            StreamSource::parse("rtsp://cam/stream"),
            StreamSource::Url("rtsp://cam/stream".into())
        );
        assert_eq!(StreamSource::parse("-1"), StreamSource::Url("-1".into()));
    }
}
