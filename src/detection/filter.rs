// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果过滤 (标签 / ROI) 与抽帧

use crate::config::{AnalyticsConfig, Roi};
use crate::models::Detection;

/// 只保留允许的标签; 未配置时全部保留
pub fn label_filter(dets: Vec<Detection>, config: &AnalyticsConfig) -> Vec<Detection> {
    if config.objects.is_none() {
        return dets;
    }
    dets.into_iter()
        .filter(|d| config.allows_label(&d.label))
        .collect()
}

/// 框中心 (按帧尺寸归一化) 必须严格落在 ROI 内部
pub fn roi_filter(
    dets: Vec<Detection>,
    roi: Option<&Roi>,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    let Some(roi) = roi else {
        return dets;
    };
    if frame_width == 0 || frame_height == 0 {
        return Vec::new();
    }
    dets.into_iter()
        .filter(|d| {
            let (cx, cy) = d.center();
            roi.contains(cx / frame_width as f32, cy / frame_height as f32)
        })
        .collect()
}

pub fn apply(
    dets: Vec<Detection>,
    config: &AnalyticsConfig,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    let dets = label_filter(dets, config);
    roi_filter(dets, config.roi.as_ref(), frame_width, frame_height)
}

/// 抽帧计数器: 每 `every` 个新帧处理一次
#[derive(Debug, Clone)]
pub struct FrameSkipper {
    every: u64,
    counter: u64,
}

impl FrameSkipper {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1) as u64,
            counter: 0,
        }
    }

    /// 记一帧, 返回是否需要处理
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        self.counter % self.every == 0
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn count(&self) -> u64 {
        self.counter
    }
}
