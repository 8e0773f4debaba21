// 集成测试公用: 通道驱动的视频流后端, 脚本化模型, 内存事件输出
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use ndarray::{Array4, ArrayD, IxDyn};
use yolov8_analytics::input::{Frame, FrameSink, FrameStream, StreamBackend, StreamSource};
use yolov8_analytics::models::{BoxXywh, Detection, Letterbox, Model};
use yolov8_analytics::{Error, Result};

/// 每次 open 取下一个脚本会话; None 或脚本用完即拒绝连接
#[derive(Clone, Default)]
pub struct ChannelBackend {
    sessions: Arc<Mutex<VecDeque<Option<Receiver<Frame>>>>>,
    pub opens: Arc<AtomicUsize>,
    pub exited: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ChannelBackend {
    /// 排入一个可连接的会话, 返回喂帧的发送端; 丢弃发送端即断流
    pub fn session(&self) -> Sender<Frame> {
        let (tx, rx) = unbounded();
        self.sessions.lock().unwrap().push_back(Some(rx));
        tx
    }

    pub fn refuse(&self) {
        self.sessions.lock().unwrap().push_back(None);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn all_exited(&self) -> bool {
        self.exited
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.load(Ordering::SeqCst))
    }
}

pub struct ChannelStream {
    frames: Receiver<Frame>,
    sink: FrameSink,
    exited: Arc<AtomicBool>,
}

impl FrameStream for ChannelStream {
    fn pump(self) -> Result<()> {
        let result = loop {
            if self.sink.stop_requested() {
                break Ok(());
            }
            match self.frames.recv_timeout(Duration::from_millis(5)) {
                Ok(frame) => {
                    if !self.sink.publish(frame) {
                        break Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(Error::connection("scripted", "stream closed"))
                }
            }
        };
        self.exited.store(true, Ordering::SeqCst);
        result
    }
}

impl StreamBackend for ChannelBackend {
    type Stream = ChannelStream;

    fn open(&self, source: &StreamSource, sink: FrameSink) -> Result<ChannelStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.sessions.lock().unwrap().pop_front().flatten();
        let frames = next.ok_or_else(|| Error::connection(source.to_string(), "connection refused"))?;
        let exited = Arc::new(AtomicBool::new(false));
        self.exited.lock().unwrap().push(exited.clone());
        Ok(ChannelStream {
            frames,
            sink,
            exited,
        })
    }
}

pub fn det(label: &str, x: i32, y: i32, w: i32, h: i32) -> Detection {
    Detection {
        label: label.to_string(),
        confidence: 0.9,
        bbox: BoxXywh { x, y, w, h },
        class_id: 0,
    }
}

/// 每帧返回同一组检测结果; fail_on 中列出的第 n 次推理 (从1起) 返回运行时错误
#[derive(Clone)]
pub struct ScriptedModel {
    pub detections: Vec<Detection>,
    pub calls: Arc<AtomicUsize>,
    /// 进入预处理的空帧数
    pub empty_frames: Arc<AtomicUsize>,
    pub fail_on: Vec<usize>,
}

impl ScriptedModel {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: Arc::new(AtomicUsize::new(0)),
            empty_frames: Arc::new(AtomicUsize::new(0)),
            fail_on: Vec::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Model for ScriptedModel {
    fn preprocess(&mut self, frame: &Frame) -> Result<(Array4<f32>, Letterbox)> {
        if frame.is_empty() {
            self.empty_frames.fetch_add(1, Ordering::SeqCst);
        }
        let lb = Letterbox::compute(frame.width(), frame.height(), 1, 1)?;
        Ok((Array4::zeros((1, 3, 1, 1)), lb))
    }

    fn run(&mut self, _xs: Array4<f32>) -> Result<ArrayD<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&n) {
            return Err(Error::Resize("boom".into()));
        }
        Ok(ArrayD::zeros(IxDyn(&[1])))
    }

    fn postprocess(&self, _ys: ArrayD<f32>, _lb: &Letterbox) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }

    fn summary(&self) {}
}

/// 线程安全的内存 stdout
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    pub fn events(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// 轮询直到事件满足 pred 或超时
    pub fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[serde_json::Value]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred(&self.events()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        pred(&self.events())
    }
}

pub fn frame() -> Frame {
    Frame::filled(100, 100, [120, 60, 30])
}

pub fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
