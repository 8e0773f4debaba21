/// FFmpeg 视频流后端 (RTSP / 本地摄像头), 仅CPU软件解码
use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::decode_filter::DecodeFilter;
use super::frame::FrameSink;
use super::grabber::{FrameStream, StreamBackend, StreamSource};
use crate::error::{Error, Result};

/// 套接字读超时 (微秒): 卡住的流会让读取线程退出, 而不是一直挂起
const SOCKET_TIMEOUT_US: &str = "5000000";

/// 解码期间检查停止请求的间隔
const STOP_POLL: Duration = Duration::from_millis(20);

const NETWORK_SCHEMES: [&str; 8] = [
    "http://", "https://", "rtmp://", "rtmps://", "tcp://", "udp://", "srt://", "hls+",
];

#[cfg(target_os = "windows")]
const CAMERA_FORMAT: &str = "dshow"; // DirectShow
#[cfg(target_os = "macos")]
const CAMERA_FORMAT: &str = "avfoundation"; // AVFoundation
#[cfg(target_os = "linux")]
const CAMERA_FORMAT: &str = "v4l2"; // Video4Linux2
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
const CAMERA_FORMAT: &str = "video4linux2";

/// 基于 ez-ffmpeg 的视频流后端
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    fn input(source: &StreamSource) -> Result<Input> {
        match source {
            StreamSource::Url(url) => {
                let opts = url_opts(url);
                let input = Input::new(url.as_str());
                if opts.is_empty() {
                    Ok(input)
                } else {
                    Ok(input.set_input_opts(opts.into_iter().collect::<HashMap<_, _>>()))
                }
            }
            StreamSource::Device(index) => {
                let url = camera_url(*index)?;
                tracing::info!("🔍 摄像头格式: {CAMERA_FORMAT}, 输入: {url}");
                Ok(Input::new(url).set_format(CAMERA_FORMAT))
            }
        }
    }
}

/// 按协议选择输入参数; 所有网络输入都带读超时
fn url_opts(url: &str) -> Vec<(&'static str, &'static str)> {
    let url = url.to_ascii_lowercase();
    if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
        vec![
            ("rtsp_transport", "tcp"),
            ("rtsp_flags", "prefer_tcp"),
            ("timeout", SOCKET_TIMEOUT_US),
        ]
    } else if NETWORK_SCHEMES.iter().any(|s| url.starts_with(s)) {
        vec![("rw_timeout", SOCKET_TIMEOUT_US)]
    } else {
        Vec::new()
    }
}

/// 按平台格式化摄像头地址
fn camera_url(index: usize) -> Result<String> {
    if cfg!(target_os = "windows") {
        // dshow 只认设备名
        let devices = ez_ffmpeg::device::get_input_video_devices()
            .map_err(|e| Error::connection(format!("camera #{index}"), e))?;
        let name = devices.get(index).ok_or_else(|| {
            Error::connection(
                format!("camera #{index}"),
                format!("only {} capture devices found", devices.len()),
            )
        })?;
        Ok(format!("video={name}"))
    } else if cfg!(target_os = "linux") {
        Ok(format!("/dev/video{index}"))
    } else {
        Ok(index.to_string())
    }
}

impl StreamBackend for FfmpegBackend {
    type Stream = FfmpegStream;

    /// 在解码线程上构建 FFmpeg 上下文 (此时已完成 demuxer 打开),
    /// 等它回报打开结果后再返回
    fn open(&self, source: &StreamSource, sink: FrameSink) -> Result<FfmpegStream> {
        let input = Self::input(source)?;
        let name = source.to_string();
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let (go_tx, go_rx) = bounded::<()>(1);

        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || decode(worker_name, input, sink, ready_tx, go_rx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("✅ 视频流已打开: {name}");
                Ok(FfmpegStream {
                    go: go_tx,
                    worker,
                })
            }
            Ok(Err(reason)) => {
                let _ = worker.join();
                Err(Error::connection(name, reason))
            }
            Err(_) => {
                let _ = worker.join();
                Err(Error::connection(name, "decoder thread exited during open"))
            }
        }
    }
}

/// 已打开的 FFmpeg 流; 丢弃未启动的流会关闭连接
pub struct FfmpegStream {
    go: Sender<()>,
    worker: JoinHandle<Result<()>>,
}

impl FrameStream for FfmpegStream {
    fn pump(self) -> Result<()> {
        // 解码线程若已退出, 发送失败无妨, 结果由 join 给出
        let _ = self.go.send(());
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::connection("ffmpeg", "decoder thread panicked")),
        }
    }
}

fn decode(
    name: String,
    input: Input,
    sink: FrameSink,
    ready: Sender<std::result::Result<(), String>>,
    go: Receiver<()>,
) -> Result<()> {
    let filter = DecodeFilter::new(sink.clone());
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let built = FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=rgb24"].into())
        .output(out)
        .build();
    let ctx = match built {
        Ok(ctx) => ctx,
        Err(e) => {
            let reason = format!("构建失败: {e}");
            let _ = ready.send(Err(reason.clone()));
            return Err(Error::connection(name, reason));
        }
    };
    let _ = ready.send(Ok(()));

    // 等待 start(); 发送端被丢弃说明流在启动前就被关闭
    if go.recv().is_err() || sink.stop_requested() {
        return Ok(());
    }

    let sch = ctx
        .start()
        .map_err(|e| Error::connection(name.as_str(), format!("启动失败: {e}")))?;
    tracing::info!("✅ CPU软件解码启动成功");

    // 设备源或卡住的流可能不再回调过滤器, 这里主动轮询停止请求
    let aborted = supervise(&sink, || sch.is_ended(), || sch.abort());
    match sch.wait() {
        Ok(_) => Ok(()),
        Err(_) if aborted || sink.stop_requested() => Ok(()),
        Err(e) => Err(Error::connection(name, e)),
    }
}

/// 等到调度结束或收到停止请求; 收到停止请求时中止调度并返回 true
fn supervise(sink: &FrameSink, is_ended: impl Fn() -> bool, abort: impl FnOnce()) -> bool {
    loop {
        if is_ended() {
            return false;
        }
        if sink.stop_requested() {
            tracing::debug!("🛑 中止FFmpeg调度");
            abort();
            return true;
        }
        thread::sleep(STOP_POLL);
    }
}
