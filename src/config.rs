// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 分析配置 (Analytics configuration)
//!
//! 命令行参数 + base64编码的JSON配置块, 启动时解析一次, 之后只读。

use std::collections::HashSet;
use std::path::PathBuf;

use base64::Engine;
use clap::Parser;
use phf::phf_map;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::OrtEP;

pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_FRAME_SKIP: u32 = 5;
pub const DEFAULT_IOU: f32 = 0.5;
pub const DEFAULT_MODEL_FILE: &str = "yolov8n.onnx";

/// 分析进程参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 视频流分析 (JSON事件输出)", long_about = None)]
pub struct Args {
    /// RTSP流地址 (或本地摄像头序号)
    pub stream_url: Option<String>,

    /// base64编码的JSON配置; 其中 resize_width 只对动态输入尺寸的模型生效
    pub config: Option<String>,

    /// 推理后端: auto | cpu | dml | cuda | tensorrt | coreml
    pub provider: Option<String>,

    /// ONNX模型路径 (默认: 可执行文件同目录下的 yolov8n.onnx)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// NMS IOU阈值
    #[arg(long, default_value_t = DEFAULT_IOU)]
    pub iou: f32,
}

impl Args {
    /// 解析模型路径: --model > 可执行文件目录 > 当前目录
    pub fn model_path(&self) -> PathBuf {
        if let Some(path) = &self.model {
            return path.clone();
        }
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_MODEL_FILE)));
        match beside_exe {
            Some(path) if path.exists() => path,
            _ => PathBuf::from(DEFAULT_MODEL_FILE),
        }
    }

    pub fn provider_choice(&self) -> ProviderChoice {
        ProviderChoice::parse(self.provider.as_deref().unwrap_or("auto"))
    }
}

/// 感兴趣区域, 归一化坐标 [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Roi {
    /// 严格内部判定: 落在边界上的点不算
    pub fn contains(&self, nx: f32, ny: f32) -> bool {
        nx > self.x && nx < self.x + self.w && ny > self.y && ny < self.y + self.h
    }

    fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x) && in_unit(self.y) && in_unit(self.w) && in_unit(self.h)) {
            return Err(Error::ConfigDecode(format!("roi out of range: {self:?}")));
        }
        if self.w <= 0.0 || self.h <= 0.0 {
            return Err(Error::ConfigDecode(format!("roi has no area: {self:?}")));
        }
        Ok(())
    }
}

/// 已校验的分析配置
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub objects: Option<HashSet<String>>,
    pub confidence: f32,
    pub frame_skip: u32,
    pub roi: Option<Roi>,
    pub resize_width: Option<u32>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            objects: None,
            confidence: DEFAULT_CONFIDENCE,
            frame_skip: DEFAULT_FRAME_SKIP,
            roi: None,
            resize_width: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Number {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Number::Int(v) => Some(*v),
            Number::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            Number::Float(_) => None,
            Number::Text(s) => s.trim().parse::<f64>().ok().map(|v| v.trunc() as i64),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawConfig {
    objects: Option<Vec<String>>,
    confidence: Option<f32>,
    frame_skip: Option<Number>,
    roi: Option<Roi>,
    resize_width: Option<Number>,
}

impl AnalyticsConfig {
    /// 解码配置块; 空/缺失 → 全部默认值
    pub fn decode(blob: Option<&str>) -> Result<Self> {
        let blob = match blob.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(b) => b,
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| Error::ConfigDecode(format!("base64: {e}")))?;
        let raw: RawConfig = serde_json::from_slice(&bytes)
            .map_err(|e| Error::ConfigDecode(format!("json: {e}")))?;

        Self::from_raw(raw)
    }

    /// 解码失败时回退到默认配置 (从不致命)
    pub fn decode_or_default(blob: Option<&str>) -> Self {
        Self::decode(blob).unwrap_or_else(|e| {
            tracing::warn!("⚠️ {e}, 使用默认配置");
            Self::default()
        })
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut config = Self::default();

        // 空列表等同于不过滤
        config.objects = raw
            .objects
            .filter(|labels| !labels.is_empty())
            .map(|labels| labels.into_iter().collect());

        if let Some(confidence) = raw.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(Error::ConfigDecode(format!(
                    "confidence out of range: {confidence}"
                )));
            }
            config.confidence = confidence;
        }

        if let Some(skip) = raw.frame_skip {
            let skip = skip
                .as_i64()
                .ok_or_else(|| Error::ConfigDecode("frame_skip is not a number".into()))?;
            config.frame_skip = match skip {
                0 => 1,
                n if n < 0 => {
                    return Err(Error::ConfigDecode(format!("negative frame_skip: {n}")))
                }
                n => u32::try_from(n).unwrap_or(u32::MAX),
            };
        }

        if let Some(roi) = raw.roi {
            roi.validate()?;
            config.roi = Some(roi);
        }

        if let Some(width) = raw.resize_width {
            config.resize_width = match width.as_i64() {
                Some(w) if w > 0 => Some(u32::try_from(w).unwrap_or(u32::MAX)),
                _ => None,
            };
        }

        Ok(config)
    }

    pub fn allows_label(&self, label: &str) -> bool {
        self.objects
            .as_ref()
            .map_or(true, |allowed| allowed.contains(label))
    }
}

// 加速后端别名
static ACCELERATORS: phf::Map<&'static str, OrtEP> = phf_map! {
    "dml" => OrtEP::DirectML,
    "directml" => OrtEP::DirectML,
    "cuda" => OrtEP::CUDA,
    "trt" => OrtEP::TensorRT,
    "tensorrt" => OrtEP::TensorRT,
    "coreml" => OrtEP::CoreML,
};

/// 推理后端选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    Auto,
    Accelerator(OrtEP),
    Cpu,
}

impl ProviderChoice {
    pub fn parse(hint: &str) -> Self {
        let hint = hint.trim().to_ascii_lowercase();
        match hint.as_str() {
            "" | "auto" => Self::Auto,
            "cpu" => Self::Cpu,
            other => match ACCELERATORS.get(other) {
                Some(ep) => Self::Accelerator(*ep),
                None => {
                    tracing::warn!("⚠️ 未知推理后端 {other:?}, 按 auto 处理");
                    Self::Auto
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(json)
    }

    #[test]
    fn empty_blob_uses_defaults() {
        for blob in [None, Some(""), Some("   ")] {
            let config = AnalyticsConfig::decode(blob).unwrap();
            assert_eq!(config.confidence, 0.5);
            assert_eq!(config.frame_skip, 5);
            assert!(config.objects.is_none());
            assert!(config.roi.is_none());
            assert!(config.resize_width.is_none());
        }
    }

    #[test]
    fn decodes_host_payload() {
        let blob = encode(r#"{"objects":["person","car"],"resize_width":416,"frame_skip":10}"#);
        let config = AnalyticsConfig::decode(Some(&blob)).unwrap();
        assert_eq!(config.frame_skip, 10);
        assert_eq!(config.resize_width, Some(416));
        assert!(config.allows_label("car"));
        assert!(!config.allows_label("dog"));
        assert_eq!(config.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn empty_object_list_means_no_filter() {
        let blob = encode(r#"{"objects":[]}"#);
        let config = AnalyticsConfig::decode(Some(&blob)).unwrap();
        assert!(config.objects.is_none());
        assert!(config.allows_label("toothbrush"));
    }

    #[test]
    fn frame_skip_zero_becomes_one_and_strings_parse() {
        let config = AnalyticsConfig::decode(Some(&encode(r#"{"frame_skip":0}"#))).unwrap();
        assert_eq!(config.frame_skip, 1);
        let config = AnalyticsConfig::decode(Some(&encode(r#"{"frame_skip":"3"}"#))).unwrap();
        assert_eq!(config.frame_skip, 3);
        let config = AnalyticsConfig::decode(Some(&encode(r#"{"frame_skip":7.9}"#))).unwrap();
        assert_eq!(config.frame_skip, 7);
    }

    #[test]
    fn malformed_blob_falls_back_to_defaults() {
        assert!(matches!(
            AnalyticsConfig::decode(Some("%%%not-base64%%%")),
            Err(Error::ConfigDecode(_))
        ));
        assert!(AnalyticsConfig::decode(Some(&encode("{not json"))).is_err());
        assert_eq!(
            AnalyticsConfig::decode_or_default(Some(&encode("[1,2,3]"))),
            AnalyticsConfig::default()
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(AnalyticsConfig::decode(Some(&encode(r#"{"confidence":1.5}"#))).is_err());
        assert!(AnalyticsConfig::decode(Some(&encode(r#"{"frame_skip":-2}"#))).is_err());
        let roi = r#"{"roi":{"x":0.5,"y":0.5,"w":0.0,"h":0.2}}"#;
        assert!(AnalyticsConfig::decode(Some(&encode(roi))).is_err());
    }

    #[test]
    fn roi_is_strict_interior() {
        let roi = Roi { x: 0.25, y: 0.25, w: 0.5, h: 0.5 };
        assert!(roi.contains(0.5, 0.5));
        assert!(!roi.contains(0.25, 0.5));
        assert!(!roi.contains(0.75, 0.5));
        assert!(!roi.contains(0.5, 0.75));
    }

    #[test]
    fn provider_hints() {
        assert_eq!(ProviderChoice::parse("auto"), ProviderChoice::Auto);
        assert_eq!(ProviderChoice::parse("CPU"), ProviderChoice::Cpu);
        assert_eq!(
            ProviderChoice::parse("dml"),
            ProviderChoice::Accelerator(OrtEP::DirectML)
        );
        assert_eq!(
            ProviderChoice::parse("tensorrt"),
            ProviderChoice::Accelerator(OrtEP::TensorRT)
        );
        assert_eq!(ProviderChoice::parse("quantum"), ProviderChoice::Auto);
    }
}
