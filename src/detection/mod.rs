/// 检测系统 (Detection System)
///
/// - DetectionLoop: 拉流 → 抽帧 → 推理 → 过滤 → 事件输出, 断流重连
/// - filter: 标签 / ROI 过滤与抽帧计数
pub mod detector;
pub mod filter;

pub use detector::{DetectionLoop, LoopTimings};
pub use filter::FrameSkipper;
