// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测主循环 (Detection Loop)
//! 职责: 拉取最新帧 → 抽帧 → YOLO检测 → 过滤 → 输出JSON事件, 断流自动重连
//!
//! ```text
//! Disconnected → Connecting ⇄ (失败: error事件 + 退避)
//!                    ↓
//!               Streaming ──断流──→ Connecting
//!                    ↓ 运行时错误
//!                  Error ──退避──→ Connecting
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::filter::{self, FrameSkipper};
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::events::{Event, EventWriter};
use crate::input::{Frame, FrameGrabber, StreamBackend, StreamSource};
use crate::models::{Detection, Model};

/// 可取消等待的最大切片
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// 连接失败/运行错误后的退避
    pub backoff: Duration,
    /// 连接成功后的预热
    pub warmup: Duration,
    /// 暂无帧时的轮询间隔
    pub poll: Duration,
    /// 没有新帧时的空转间隔
    pub idle_tick: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            warmup: Duration::from_secs(2),
            poll: Duration::from_millis(500),
            idle_tick: Duration::from_millis(10),
        }
    }
}

enum State<B: StreamBackend> {
    Disconnected,
    Connecting,
    Streaming(FrameGrabber<B::Stream>),
    Error(String),
}

pub struct DetectionLoop<B: StreamBackend, M: Model, W: Write> {
    backend: B,
    source: StreamSource,
    model: M,
    config: AnalyticsConfig,
    out: EventWriter<W>,
    timings: LoopTimings,
    shutdown: Arc<AtomicBool>,
    // 统计
    processed: u64,
    emitted: u64,
}

impl<B: StreamBackend, M: Model, W: Write> DetectionLoop<B, M, W> {
    pub fn new(
        backend: B,
        source: StreamSource,
        model: M,
        config: AnalyticsConfig,
        out: EventWriter<W>,
    ) -> Self {
        Self {
            backend,
            source,
            model,
            config,
            out,
            timings: LoopTimings::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            processed: 0,
            emitted: 0,
        }
    }

    pub fn with_timings(mut self, timings: LoopTimings) -> Self {
        self.timings = timings;
        self
    }

    /// 外部停止信号 (Ctrl+C)
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// 可取消等待; 收到停止信号返回 false
    fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }

    /// 运行直到收到停止信号; 只有事件写入失败才返回错误
    pub fn run(mut self) -> Result<()> {
        tracing::info!(
            "🎬 检测循环启动: {} (frame_skip={}, conf={})",
            self.source,
            self.config.frame_skip,
            self.config.confidence
        );

        let mut state: State<B> = State::Disconnected;
        while !self.stopping() {
            state = match state {
                State::Disconnected => State::Connecting,
                State::Connecting => self.connect()?,
                State::Streaming(grabber) => self.stream(grabber)?,
                State::Error(reason) => {
                    self.out
                        .emit(&Event::error(format!("Runtime error: {reason}")))?;
                    self.wait(self.timings.backoff);
                    State::Connecting
                }
            };
        }

        // 停止采集线程后再报告
        drop(state);
        tracing::info!(
            "🛑 检测循环退出 (推理{}帧, 输出{}次)",
            self.processed,
            self.emitted
        );
        self.out.emit(&Event::info("Analytics stopped"))?;
        Ok(())
    }

    fn connect(&mut self) -> Result<State<B>> {
        tracing::info!("🔗 连接视频流: {}", self.source);
        let mut grabber = match FrameGrabber::open(&self.backend, &self.source) {
            Ok(grabber) => grabber,
            Err(e) => {
                tracing::warn!("❌ {e}");
                self.out.emit(&Event::error(e.to_string()))?;
                self.wait(self.timings.backoff);
                return Ok(State::Connecting);
            }
        };
        if let Err(e) = grabber.start() {
            return Ok(State::Error(e.to_string()));
        }
        self.wait(self.timings.warmup);
        Ok(State::Streaming(grabber))
    }

    fn stream(&mut self, mut grabber: FrameGrabber<B::Stream>) -> Result<State<B>> {
        let mut skipper = FrameSkipper::new(self.config.frame_skip);
        let mut last_seq = None;

        while !self.stopping() {
            let Some(snapshot) = grabber.read() else {
                self.wait(self.timings.poll);
                if grabber.is_stopped() {
                    return self.lost(grabber);
                }
                continue;
            };

            if last_seq == Some(snapshot.seq) {
                if grabber.is_stopped() {
                    return self.lost(grabber);
                }
                self.wait(self.timings.idle_tick);
                continue;
            }
            last_seq = Some(snapshot.seq);

            // 无效帧按"无帧"处理: 不计数, 不进预处理
            if snapshot.frame.is_empty() {
                tracing::debug!("⚠️ 丢弃空帧 seq={}", snapshot.seq);
                self.wait(self.timings.poll);
                if grabber.is_stopped() {
                    return self.lost(grabber);
                }
                continue;
            }

            if !skipper.tick() {
                continue;
            }

            match self.process(&snapshot.frame) {
                Ok(dets) if dets.is_empty() => {}
                Ok(dets) => {
                    self.out.emit(&Event::detected(dets))?;
                    self.emitted += 1;
                }
                Err(e) if e.is_frame_local() => {
                    tracing::warn!("⚠️ 跳过帧 #{}: {e}", skipper.count());
                }
                Err(e) => {
                    tracing::error!("❌ 运行时错误: {e}");
                    grabber.stop();
                    return Ok(State::Error(e.to_string()));
                }
            }
        }

        grabber.stop();
        Ok(State::Disconnected)
    }

    fn lost(&mut self, mut grabber: FrameGrabber<B::Stream>) -> Result<State<B>> {
        grabber.stop();
        tracing::warn!("📴 视频流中断: {}", self.source);
        self.out
            .emit(&Event::error(format!("Video stream lost: {}", self.source)))?;
        Ok(State::Connecting)
    }

    fn process(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let t = Instant::now();
        let dets = self.model.forward(frame)?;
        self.processed += 1;
        tracing::debug!("🔍 推理 {} 个目标, 耗时 {:?}", dets.len(), t.elapsed());
        Ok(filter::apply(
            dets,
            &self.config,
            frame.width(),
            frame.height(),
        ))
    }
}
