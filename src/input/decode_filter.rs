/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use std::time::Instant;

use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};

use super::frame::{Frame, FrameSink};

const MAX_DIMENSION: u32 = 4096;

/// FFmpeg解码过滤器: rgb24帧 → 最新帧槽
pub struct DecodeFilter {
    sink: FrameSink,
    count: usize,
    last: Instant,
    pub dropped_frames: usize, // 丢弃的帧数
    pub total_frames: usize,   // 总帧数
}

impl DecodeFilter {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink,
            count: 0,
            last: Instant::now(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: std::fmt::Arguments<'_>) -> Result<Option<AvFrame>, String> {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            tracing::warn!("⚠️ 丢弃帧 #{}: {reason}", self.total_frames);
        }
        Ok(None)
    }

    fn report(&mut self) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }
        let drop_rate = self.dropped_frames as f64 / self.total_frames.max(1) as f64 * 100.0;
        tracing::debug!(
            "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
            self.count as f64 / elapsed,
            self.total_frames,
            self.dropped_frames,
            drop_rate
        );
        self.last = Instant::now();
        self.count = 0;
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        // 收到停止请求: 返回错误让 FFmpeg 结束整条管线
        if self.sink.stop_requested() {
            return Err("frame grabber stopped".to_string());
        }

        self.total_frames += 1;

        unsafe {
            // 基本检查：空帧或损坏帧
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return self.drop_frame(format_args!("空帧/损坏帧"));
            }

            let raw = &*frame.as_ptr();
            let w = raw.width.max(0) as u32;
            let h = raw.height.max(0) as u32;

            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                return self.drop_frame(format_args!("非法分辨率 {w}x{h}"));
            }

            // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
            if raw.decode_error_flags & 0x03 != 0 {
                return self.drop_frame(format_args!(
                    "解码错误标志=0x{:02x}",
                    raw.decode_error_flags
                ));
            }

            let plane = raw.data[0];
            let stride = raw.linesize[0];
            let row_bytes = w as usize * 3;
            if plane.is_null() || stride < 0 || (stride as usize) < row_bytes {
                return self.drop_frame(format_args!("rgb24平面异常 stride={stride}"));
            }

            // 按行拷贝 (linesize 可能带对齐填充)
            let mut data = Vec::with_capacity(row_bytes * h as usize);
            for y in 0..h as usize {
                let row = std::slice::from_raw_parts(plane.add(y * stride as usize), row_bytes);
                data.extend_from_slice(row);
            }

            let Ok(rgb) = Frame::new(w, h, data) else {
                return self.drop_frame(format_args!("缓冲区长度不匹配"));
            };

            self.count += 1;
            if !self.sink.publish(rgb) {
                return Err("frame grabber stopped".to_string());
            }
        }

        self.report();
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::debug!(
            "✅ 解码线程退出 (总帧{}, 丢弃{})",
            self.total_frames,
            self.dropped_frames
        );
    }
}
