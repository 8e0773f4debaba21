#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 分析配置 (CLI + base64 JSON)
pub mod detection; // 检测主循环 + 过滤
pub mod error; // 错误类型
pub mod events; // stdout JSON事件协议
pub mod input; // 视频输入系统
pub mod models; // 模型接口与具体实现
pub mod ort_backend;
pub mod telemetry; // stderr日志

pub use crate::config::{AnalyticsConfig, Args, ProviderChoice, Roi};
pub use crate::error::{Error, Result};
pub use crate::events::{Event, EventWriter};
pub use crate::models::{Detection, Letterbox, Model, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtEP};

/// 贪心NMS
///
/// 按置信度稳定降序排序 (同分保持原顺序), 与已保留框IOU超过阈值的框被丢弃。
/// `class_aware` 为 true 时只在同类别之间抑制。
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32, class_aware: bool) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if class_aware && xs[prev_index].id() != xs[index].id() {
                continue;
            }
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // 原图坐标系下的检测框
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    /// 由左上/右下角点构造
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, id: usize, confidence: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1, id, confidence)
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.) * self.height.max(0.)
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// COCO 80类标签 (Ultralytics 导出顺序)
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, id: usize, conf: f32) -> Bbox {
        Bbox::new(x, y, w, h, id, conf)
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = bbox(0., 0., 10., 10., 0, 0.9);
        let b = bbox(20., 20., 10., 10., 0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(bbox(0., 0., 0., 0., 0, 0.9).iou(&a), 0.0);
    }

    #[test]
    fn nms_keeps_highest_of_overlapping_pair() {
        let mut xs = vec![
            bbox(0., 0., 10., 10., 0, 0.6),
            bbox(1., 1., 10., 10., 0, 0.9),
            bbox(50., 50., 10., 10., 0, 0.7),
        ];
        non_max_suppression(&mut xs, 0.5, false);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence(), 0.9);
        assert_eq!(xs[1].confidence(), 0.7);
    }

    #[test]
    fn nms_is_idempotent() {
        let mut xs = vec![
            bbox(0., 0., 10., 10., 0, 0.6),
            bbox(2., 2., 10., 10., 1, 0.8),
            bbox(4., 4., 10., 10., 2, 0.7),
            bbox(30., 30., 5., 5., 0, 0.5),
        ];
        non_max_suppression(&mut xs, 0.3, false);
        let once = xs.clone();
        non_max_suppression(&mut xs, 0.3, false);
        assert_eq!(xs, once);
    }

    #[test]
    fn nms_ties_keep_first_occurrence() {
        let mut xs = vec![
            bbox(0., 0., 10., 10., 3, 0.8),
            bbox(0., 0., 10., 10., 7, 0.8),
        ];
        non_max_suppression(&mut xs, 0.5, false);
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].id(), 3);
    }

    #[test]
    fn class_aware_nms_keeps_other_classes() {
        let mut xs = vec![
            bbox(0., 0., 10., 10., 0, 0.9),
            bbox(0., 0., 10., 10., 1, 0.8),
        ];
        non_max_suppression(&mut xs, 0.5, true);
        assert_eq!(xs.len(), 2);
    }
}
