/// 模型统一接口与实现
///
/// ## Model Trait
/// 统一的模型接口，定义标准流程: preprocess → run → postprocess
///
/// ```text
/// 原始帧 → preprocess → (NCHW张量, Letterbox)
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → Vec<Detection> (原图坐标)
/// ```
///
/// ## 使用示例
/// ```no_run
/// use yolov8_analytics::models::{Model, YOLOv8};
/// use yolov8_analytics::{AnalyticsConfig, OrtEP};
///
/// # fn main() -> yolov8_analytics::Result<()> {
/// # let frame = yolov8_analytics::input::Frame::filled(640, 480, [0, 0, 0]);
/// let config = AnalyticsConfig::default();
/// let mut model = YOLOv8::load("yolov8n.onnx".as_ref(), &[OrtEP::CPU], &config, 0.5)?;
/// let detections = model.forward(&frame)?;
/// # Ok(())
/// # }
/// ```
use ndarray::{Array4, ArrayD};

use crate::error::Result;
use crate::input::Frame;

pub mod postprocess;
pub mod preprocess;
pub mod yolov8; // YOLOv8 完整模型 + 实现 Model trait

pub use postprocess::{postprocess, BoxXywh, Detection, PostprocessConfig};
pub use preprocess::{letterbox, Letterbox};
pub use yolov8::YOLOv8;

/// 统一的深度学习模型接口
pub trait Model {
    /// 预处理: 帧 → NCHW 张量 + 坐标变换
    ///
    /// 空帧返回 `InvalidFrame`, 不会进入推理
    fn preprocess(&mut self, frame: &Frame) -> Result<(Array4<f32>, Letterbox)>;

    /// 推理: 执行一次前向传播, 不重试
    fn run(&mut self, xs: Array4<f32>) -> Result<ArrayD<f32>>;

    /// 后处理: 原始输出 → 检测结果
    fn postprocess(&self, ys: ArrayD<f32>, lb: &Letterbox) -> Result<Vec<Detection>>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (xs, lb) = self.preprocess(frame)?;
        let ys = self.run(xs)?;
        self.postprocess(ys, &lb)
    }

    /// 打印模型信息
    fn summary(&self);
}
