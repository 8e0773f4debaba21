// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 日志初始化: 全部写到 stderr, stdout 只留给事件协议

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 subscriber (RUST_LOG, 默认 info)。重复调用无副作用。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
