// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理引擎
//!
//! 按顺序尝试推理后端 (provider plan), 每次注册都带 `error_on_failure`,
//! 不允许 ONNX Runtime 内部静默回退到 CPU。

use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayD, IxDyn};
use once_cell::sync::Lazy;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use regex::Regex;

use crate::config::ProviderChoice;
use crate::error::{Error, Result};

/// Ultralytics 默认输入尺寸
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// Ultralytics 下采样步长
pub const STRIDE: u32 = 32;

/// 推理后端 (Execution Provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrtEP {
    CPU,
    CUDA,
    TensorRT,
    DirectML,
    CoreML,
}

impl OrtEP {
    /// ONNX Runtime 中的 provider 名称 (事件协议里上报的就是它)
    pub fn provider_name(&self) -> &'static str {
        match self {
            OrtEP::CPU => "CPUExecutionProvider",
            OrtEP::CUDA => "CUDAExecutionProvider",
            OrtEP::TensorRT => "TensorrtExecutionProvider",
            OrtEP::DirectML => "DmlExecutionProvider",
            OrtEP::CoreML => "CoreMLExecutionProvider",
        }
    }

    fn dispatch(&self) -> ExecutionProviderDispatch {
        let ep = match self {
            OrtEP::CPU => CPUExecutionProvider::default().build(),
            OrtEP::CUDA => CUDAExecutionProvider::default().build(),
            OrtEP::TensorRT => TensorRTExecutionProvider::default().build(),
            OrtEP::DirectML => DirectMLExecutionProvider::default().build(),
            OrtEP::CoreML => CoreMLExecutionProvider::default().build(),
        };
        ep.error_on_failure()
    }
}

/// 当前平台首选的加速后端
pub fn preferred_accelerator() -> Option<OrtEP> {
    if cfg!(target_os = "windows") {
        Some(OrtEP::DirectML)
    } else if cfg!(target_os = "macos") {
        Some(OrtEP::CoreML)
    } else if cfg!(feature = "cuda") {
        Some(OrtEP::CUDA)
    } else {
        None
    }
}

/// 把用户选择展开成按顺序尝试的后端列表, CPU 永远兜底
pub fn provider_plan(choice: ProviderChoice) -> Vec<OrtEP> {
    match choice {
        ProviderChoice::Cpu => vec![OrtEP::CPU],
        ProviderChoice::Accelerator(OrtEP::CPU) => vec![OrtEP::CPU],
        ProviderChoice::Accelerator(ep) => vec![ep, OrtEP::CPU],
        ProviderChoice::Auto => match preferred_accelerator() {
            Some(ep) => vec![ep, OrtEP::CPU],
            None => vec![OrtEP::CPU],
        },
    }
}

/// 依次尝试 plan 中的后端, 返回第一个成功的
///
/// 失败的尝试只写 stderr 日志; 全部失败 → `ModelLoad`。
pub fn select_provider<T, F>(plan: &[OrtEP], mut try_init: F) -> Result<(OrtEP, T)>
where
    F: FnMut(OrtEP) -> Result<T>,
{
    let mut last_err = String::from("empty provider plan");
    for &ep in plan {
        match try_init(ep) {
            Ok(value) => {
                tracing::info!("✅ 推理后端: {}", ep.provider_name());
                return Ok((ep, value));
            }
            Err(e) => {
                tracing::warn!("⚠️ 推理后端 {} 初始化失败: {e}", ep.provider_name());
                last_err = match e {
                    Error::ModelLoad(msg) => msg,
                    other => other.to_string(),
                };
            }
        }
    }
    Err(Error::ModelLoad(last_err))
}

// names 元数据: "{0: 'person', 1: 'bicycle', ...}"
static NAMES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*:\s*'([^']*)'").unwrap_or_else(|e| panic!("names regex: {e}"))
});

/// 解析 Ultralytics 导出的 `names` 元数据
pub fn parse_names(raw: &str) -> Vec<String> {
    let mut pairs: Vec<(usize, String)> = NAMES_RE
        .captures_iter(raw)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);
    pairs.into_iter().map(|(_, name)| name).collect()
}

/// 根据输入维度和 resize_width 决定推理尺寸 (height, width)
pub fn resolve_input_size(dims: &[i64], hint: Option<u32>) -> (u32, u32) {
    let dynamic_size = || {
        hint.map(|w| w.div_ceil(STRIDE) * STRIDE)
            .unwrap_or(DEFAULT_INPUT_SIZE)
    };
    let dim = |i: usize| dims.get(i).copied().filter(|d| *d > 0).map(|d| d as u32);

    match (dim(2), dim(3)) {
        (Some(h), Some(w)) => {
            if let Some(hint) = hint {
                if hint != w {
                    tracing::debug!("模型输入固定为 {w}x{h}, 忽略 resize_width={hint}");
                }
            }
            (h, w)
        }
        (Some(h), None) => (h, dynamic_size()),
        (None, Some(w)) => (dynamic_size(), w),
        (None, None) => {
            let size = dynamic_size();
            (size, size)
        }
    }
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    model_path: PathBuf,
    input_name: String,
    output_name: String,
    height: u32,
    width: u32,
    nc: Option<u32>,
    names: Option<Vec<String>>,
}

impl OrtBackend {
    /// 加载模型: 按 plan 顺序尝试后端
    pub fn build(model_path: &Path, plan: &[OrtEP], size_hint: Option<u32>) -> Result<Self> {
        if !model_path.is_file() {
            return Err(Error::ModelLoad(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let (ep, session) = select_provider(plan, |ep| Self::commit(model_path, ep))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| Error::ModelLoad("model has no inputs".into()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| Error::ModelLoad("model has no outputs".into()))?;

        let input_dims: Vec<i64> = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .unwrap_or_default();
        let (height, width) = resolve_input_size(&input_dims, size_hint);

        // [1, 4+nc, N] 或 [1, N, 4+nc]
        let nc = output.output_type.tensor_shape().and_then(|shape| {
            let (a, b) = (*shape.get(1)?, *shape.get(2)?);
            let features = match (a > 0, b > 0) {
                (true, true) => a.min(b),
                (true, false) => a,
                _ => return None,
            };
            (features > 4).then(|| (features - 4) as u32)
        });

        let names = session
            .metadata()
            .ok()
            .and_then(|meta| meta.custom("names").ok().flatten())
            .map(|raw| parse_names(&raw))
            .filter(|names| !names.is_empty());

        Ok(Self {
            input_name: input.name.clone(),
            output_name: output.name.clone(),
            session,
            ep,
            model_path: model_path.to_path_buf(),
            height,
            width,
            nc,
            names,
        })
    }

    fn commit(model_path: &Path, ep: OrtEP) -> Result<Session> {
        fn load_err(e: impl std::fmt::Display) -> Error {
            Error::ModelLoad(e.to_string())
        }
        Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .with_execution_providers([ep.dispatch()])
            .map_err(load_err)?
            .commit_from_file(model_path)
            .map_err(load_err)
    }

    /// 单次前向推理
    pub fn run(&mut self, x: Array4<f32>) -> Result<ArrayD<f32>> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(x.view())?
        ])?;
        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?)
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn nc(&self) -> Option<u32> {
        self.nc
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_always_end_with_cpu() {
        assert_eq!(provider_plan(ProviderChoice::Cpu), vec![OrtEP::CPU]);
        assert_eq!(
            provider_plan(ProviderChoice::Accelerator(OrtEP::DirectML)),
            vec![OrtEP::DirectML, OrtEP::CPU]
        );
        let auto = provider_plan(ProviderChoice::Auto);
        assert_eq!(auto.last(), Some(&OrtEP::CPU));
        assert_eq!(auto.len(), 1 + preferred_accelerator().iter().count());
    }

    #[test]
    fn unavailable_accelerator_falls_back_to_cpu() {
        let mut attempts = Vec::new();
        let (ep, session) = select_provider(&[OrtEP::DirectML, OrtEP::CPU], |ep| {
            attempts.push(ep);
            match ep {
                OrtEP::CPU => Ok("cpu-session"),
                _ => Err(Error::ModelLoad("provider not available".into())),
            }
        })
        .unwrap();
        assert_eq!(ep, OrtEP::CPU);
        assert_eq!(session, "cpu-session");
        assert_eq!(attempts, vec![OrtEP::DirectML, OrtEP::CPU]);
    }

    #[test]
    fn first_working_provider_wins() {
        let mut attempts = 0;
        let (ep, _) = select_provider(&[OrtEP::CUDA, OrtEP::CPU], |_| {
            attempts += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(ep, OrtEP::CUDA);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn cpu_failure_is_model_load_error() {
        let result: Result<(OrtEP, ())> = select_provider(&[OrtEP::CPU], |_| {
            Err(Error::ModelLoad("corrupt model".into()))
        });
        match result {
            Err(Error::ModelLoad(msg)) => assert_eq!(msg, "corrupt model"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_model_file_fails_before_any_provider() {
        let result = OrtBackend::build(Path::new("/nonexistent/yolov8n.onnx"), &[OrtEP::CPU], None);
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn names_metadata() {
        let names = parse_names("{1: 'bicycle', 0: 'person', 2: 'traffic light'}");
        assert_eq!(names, vec!["person", "bicycle", "traffic light"]);
        assert!(parse_names("garbage").is_empty());
    }

    #[test]
    fn input_size_resolution() {
        assert_eq!(resolve_input_size(&[1, 3, 640, 640], None), (640, 640));
        assert_eq!(resolve_input_size(&[1, 3, 640, 640], Some(416)), (640, 640));
        assert_eq!(resolve_input_size(&[1, 3, -1, -1], Some(416)), (416, 416));
        assert_eq!(resolve_input_size(&[1, 3, -1, -1], Some(500)), (512, 512));
        assert_eq!(resolve_input_size(&[-1, 3, -1, -1], None), (640, 640));
        assert_eq!(resolve_input_size(&[], None), (640, 640));
    }
}
