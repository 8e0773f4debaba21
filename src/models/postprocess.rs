// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOv8 检测头解码: 阈值 → 逆letterbox → NMS → 标签

use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::{non_max_suppression, Bbox};

use super::preprocess::Letterbox;

const CXYWH_OFFSET: usize = 4;

/// 原图像素坐标 (整数)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoxXywh {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoxXywh,
    #[serde(skip)]
    pub class_id: usize,
}

impl Detection {
    /// 框中心 (原图像素)
    pub fn center(&self) -> (f32, f32) {
        (
            self.bbox.x as f32 + self.bbox.w as f32 / 2.0,
            self.bbox.y as f32 + self.bbox.h as f32 / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessConfig {
    pub confidence: f32,
    pub iou: f32,
    /// 只在同类别之间做NMS
    pub class_aware: bool,
    /// 模型类别数; 已知时按 4+nc 判定输出布局
    pub nc: Option<usize>,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            confidence: crate::config::DEFAULT_CONFIDENCE,
            iou: crate::config::DEFAULT_IOU,
            class_aware: false,
            nc: None,
        }
    }
}

fn shape_error() -> Error {
    Error::Shape(ndarray::ShapeError::from_kind(
        ndarray::ErrorKind::IncompatibleShape,
    ))
}

/// 统一成 (候选数, 4+nc) 视图
fn candidates<'a, 'b>(raw: &'b ArrayViewD<'a, f32>, nc: Option<usize>) -> Result<ArrayView2<'b, f32>> {
    let preds = match raw.ndim() {
        3 if raw.shape()[0] >= 1 => raw.index_axis(Axis(0), 0),
        2 => raw.view(),
        _ => return Err(shape_error()),
    };
    let preds = preds.into_dimensionality::<Ix2>()?;
    let (a, b) = preds.dim();
    let transpose = match nc.map(|nc| nc + CXYWH_OFFSET) {
        // 方阵时按 Ultralytics 默认 [4+nc, N]
        Some(feat) if a == feat => true,
        Some(feat) if b == feat => false,
        Some(feat) => {
            tracing::debug!("输出 {a}x{b} 与特征数 {feat} 不符, 按较小维判定");
            a < b
        }
        // Ultralytics 默认 [4+nc, N], 特征维较小
        None => a < b,
    };
    let preds = if transpose { preds.reversed_axes() } else { preds };
    if preds.ncols() <= CXYWH_OFFSET {
        return Err(shape_error());
    }
    Ok(preds)
}

pub fn postprocess(
    raw: ArrayViewD<'_, f32>,
    lb: &Letterbox,
    config: &PostprocessConfig,
    names: &[String],
) -> Result<Vec<Detection>> {
    let preds = candidates(&raw, config.nc)?;
    let (w0, h0) = (lb.src_width as f32, lb.src_height as f32);

    let mut boxes: Vec<Bbox> = Vec::new();
    for pred in preds.axis_iter(Axis(0)) {
        let clss = pred.slice(ndarray::s![CXYWH_OFFSET..]);
        // 第一个最大值胜出
        let Some((id, &confidence)) = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };

        // NaN 也在这里丢弃
        if !(confidence >= config.confidence) {
            continue;
        }

        let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
        let (x1, y1) = lb.inverse(cx - w / 2., cy - h / 2.);
        let (x2, y2) = lb.inverse(cx + w / 2., cy + h / 2.);
        boxes.push(Bbox::from_corners(
            x1.clamp(0., w0),
            y1.clamp(0., h0),
            x2.clamp(0., w0),
            y2.clamp(0., h0),
            id,
            confidence,
        ));
    }

    non_max_suppression(&mut boxes, config.iou, config.class_aware);

    Ok(boxes
        .into_iter()
        .map(|b| Detection {
            label: names
                .get(b.id())
                .cloned()
                .unwrap_or_else(|| format!("class_{}", b.id())),
            confidence: b.confidence(),
            bbox: BoxXywh {
                x: b.xmin() as i32,
                y: b.ymin() as i32,
                w: b.width() as i32,
                h: b.height() as i32,
            },
            class_id: b.id(),
        })
        .collect())
}
