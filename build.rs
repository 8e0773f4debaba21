// 构建脚本: 静态链接FFmpeg时补充系统依赖库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // 仅在Windows MSVC + 静态FFmpeg时需要
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    if std::env::var_os("CARGO_FEATURE_STATIC_FFMPEG").is_some() {
        // Intel QSV (Quick Sync Video) 硬件加速
        println!("cargo:rustc-link-lib=dylib=libmfx");

        // OLE 自动化和VFW (dshow 摄像头)
        println!("cargo:rustc-link-lib=dylib=oleaut32");
        println!("cargo:rustc-link-lib=dylib=vfw32");

        // Secure Channel (RTSPS/TLS)
        println!("cargo:rustc-link-lib=dylib=secur32");
    }
}
