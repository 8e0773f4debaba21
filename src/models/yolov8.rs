// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型
// 包含: 模型加载、预处理、推理、后处理

use std::path::Path;
use std::time::Instant;

use ndarray::{Array4, ArrayD};

use super::postprocess::{postprocess, Detection, PostprocessConfig};
use super::preprocess::{letterbox, Letterbox};
use super::Model;
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::input::Frame;
use crate::{OrtBackend, OrtEP, COCO_CLASSES};

/// 类别名: 元数据类别数与 COCO 不同时才使用元数据
pub fn class_names(metadata: Option<&[String]>) -> Vec<String> {
    match metadata {
        Some(names) if names.len() != COCO_CLASSES.len() => names.to_vec(),
        _ => COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
}

/// YOLOv8 模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    config: PostprocessConfig,
    names: Vec<String>,
}

impl YOLOv8 {
    pub fn new(engine: OrtBackend, mut config: PostprocessConfig) -> Self {
        let names = class_names(engine.names());
        config.nc = config.nc.or(engine.nc().map(|nc| nc as usize));
        if let Some(nc) = engine.nc() {
            if nc as usize != names.len() {
                tracing::warn!(
                    "⚠️ 模型输出 {nc} 类, 标签表只有 {} 个, 其余类别输出为 class_<id>",
                    names.len()
                );
            }
        }
        Self {
            engine,
            config,
            names,
        }
    }

    /// 按 provider plan 加载模型
    pub fn load(
        model_path: &Path,
        plan: &[OrtEP],
        analytics: &AnalyticsConfig,
        iou: f32,
    ) -> Result<Self> {
        let engine = OrtBackend::build(model_path, plan, analytics.resize_width)?;
        let config = PostprocessConfig {
            confidence: analytics.confidence,
            iou,
            ..Default::default()
        };
        Ok(Self::new(engine, config))
    }

    pub fn ep(&self) -> OrtEP {
        self.engine.ep()
    }

    pub fn width(&self) -> u32 {
        self.engine.width()
    }

    pub fn height(&self) -> u32 {
        self.engine.height()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Model for YOLOv8 {
    fn preprocess(&mut self, frame: &Frame) -> Result<(Array4<f32>, Letterbox)> {
        letterbox(frame, self.width(), self.height())
    }

    fn run(&mut self, xs: Array4<f32>) -> Result<ArrayD<f32>> {
        let t_run = Instant::now();
        let ys = self.engine.run(xs)?;
        tracing::trace!("[Model Inference]: {:?}", t_run.elapsed());
        Ok(ys)
    }

    fn postprocess(&self, ys: ArrayD<f32>, lb: &Letterbox) -> Result<Vec<Detection>> {
        postprocess(ys.view(), lb, &self.config, &self.names)
    }

    fn summary(&self) {
        tracing::info!(
            "模型: {} | EP: {} | 输入: {}x{} | 类别: {} | conf: {} | iou: {}",
            self.engine.model_path().display(),
            self.ep().provider_name(),
            self.width(),
            self.height(),
            self.names.len(),
            self.config.confidence,
            self.config.iou,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_names_by_default() {
        let names = class_names(None);
        assert_eq!(names.len(), 80);
        assert_eq!(names[0], "person");
        assert_eq!(names[79], "toothbrush");
    }

    #[test]
    fn metadata_names_only_when_class_count_differs() {
        let custom = vec!["helmet".to_string(), "vest".to_string()];
        assert_eq!(class_names(Some(custom.as_slice())), custom);

        let renamed: Vec<String> = (0..80).map(|i| format!("c{i}")).collect();
        assert_eq!(class_names(Some(renamed.as_slice()))[0], "person");
    }
}
