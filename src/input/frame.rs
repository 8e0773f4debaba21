// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧数据与"最新帧"单槽交接
//!
//! 读取线程只保留最新一帧 (Arc指针替换), 检测循环随时取走, 永远拿到完整的帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// RGB8 帧 (height × width × 3)
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize * 3 {
            return Err(Error::InvalidFrame { width, height });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// 纯色帧
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// 最新帧快照: 帧 + 发布序号
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub seq: u64,
    pub frame: Arc<Frame>,
}

#[derive(Default)]
struct Latest {
    frame: Option<Arc<Frame>>,
    seq: u64,
}

/// 读取线程与检测循环之间唯一的共享状态
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Latest>,
    stop_requested: AtomicBool,
    stopped: AtomicBool,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Option<Snapshot> {
        let latest = self.lock();
        latest.frame.as_ref().map(|frame| Snapshot {
            seq: latest.seq,
            frame: Arc::clone(frame),
        })
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// 读取端句柄: 视频流后端通过它发布帧
#[derive(Clone)]
pub struct FrameSink {
    slot: Arc<FrameSlot>,
}

impl FrameSink {
    pub(crate) fn new(slot: Arc<FrameSlot>) -> Self {
        Self { slot }
    }

    /// 发布新帧; 返回 false 表示已请求停止, 读取方应尽快退出
    pub fn publish(&self, frame: Frame) -> bool {
        if self.slot.stop_requested() {
            return false;
        }
        let frame = Arc::new(frame);
        let mut latest = self.slot.lock();
        latest.frame = Some(frame);
        latest.seq += 1;
        true
    }

    pub fn stop_requested(&self) -> bool {
        self.slot.stop_requested()
    }
}
