// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// YOLOv8 视频流分析进程
///
/// 用法: analytics <STREAM_URL> [CONFIG_B64] [PROVIDER] [--model PATH] [--iou F32]
///
/// stdout 每行一个 JSON 事件, 日志全部写 stderr。
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use yolov8_analytics::detection::DetectionLoop;
use yolov8_analytics::input::{FfmpegBackend, StreamSource};
use yolov8_analytics::ort_backend::provider_plan;
use yolov8_analytics::{telemetry, AnalyticsConfig, Args, Event, EventWriter, Model, YOLOv8};

fn main() -> Result<()> {
    telemetry::init();
    let args = Args::parse();
    let mut events = EventWriter::stdout();

    let Some(url) = args.stream_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        error!("❌ 缺少视频流地址");
        events.emit(&Event::error("RTSP URL not provided"))?;
        std::process::exit(1);
    };

    let config = AnalyticsConfig::decode_or_default(args.config.as_deref());
    let plan = provider_plan(args.provider_choice());
    let model_path = args.model_path();
    info!(
        "📦 模型: {} | 后端顺序: {:?}",
        model_path.display(),
        plan.iter().map(|ep| ep.provider_name()).collect::<Vec<_>>()
    );

    let model = match YOLOv8::load(&model_path, &plan, &config, args.iou) {
        Ok(model) => model,
        Err(e) => {
            error!("❌ {e}");
            events.emit(&Event::error(e.to_string()))?;
            std::process::exit(1);
        }
    };
    events.emit(&Event::provider(model.ep().provider_name()))?;
    model.summary();

    // Ctrl+C → 停止检测循环
    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(err) = ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || {
            shutdown.store(true, Ordering::SeqCst);
        }
    }) {
        warn!("⚠️ Ctrl+C 处理器安装失败: {err}");
    }

    DetectionLoop::new(
        FfmpegBackend,
        StreamSource::parse(url),
        model,
        config,
        events,
    )
    .with_shutdown(shutdown)
    .run()?;

    Ok(())
}
