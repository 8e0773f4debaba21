/// 视频输入系统 (Video Input System)
///
/// 独立采集线程, 只保留最新一帧
/// - FrameGrabber: 采集线程 + 最新帧单槽
/// - FfmpegBackend: RTSP/摄像头解码 (ez-ffmpeg, DirectShow/AVFoundation/V4L2)
/// - DecodeFilter: 帧校验与拷贝
pub mod frame;
pub mod grabber;

#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;

pub use frame::{Frame, FrameSink, Snapshot};
pub use grabber::{FrameGrabber, FrameStream, StreamBackend, StreamSource};

#[cfg(feature = "ffmpeg")]
pub use decode_filter::DecodeFilter;
#[cfg(feature = "ffmpeg")]
pub use decoder::{FfmpegBackend, FfmpegStream};
