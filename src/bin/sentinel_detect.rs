/// 检测会话命令行入口
/// 图片: 同步检测并输出 JSON
/// 视频流: 创建会话, 逐行输出检测事件, 会话结束后退出
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sentinel_detect::{
    Args, ChannelDispatcher, DetectConfig, DetectPlugin, MediaObject, MotionBackend,
    PipelineExecutor, RequestKind, SessionParams, StreamInput,
};
#[cfg(not(feature = "ffmpeg"))]
use sentinel_detect::{CompletionSignal, DetectError, FrameCallback, PipelineSpec};

/// 未启用 ffmpeg 特性时的占位执行器
#[cfg(not(feature = "ffmpeg"))]
struct UnavailableExecutor;

#[cfg(not(feature = "ffmpeg"))]
impl PipelineExecutor for UnavailableExecutor {
    fn launch(
        &self,
        spec: PipelineSpec,
        _callback: FrameCallback,
        _completion: CompletionSignal,
    ) -> sentinel_detect::Result<()> {
        Err(DetectError::PipelineFailure(format!(
            "built without the ffmpeg feature, can not open {}",
            spec.source.url()
        )))
    }
}

fn executor() -> Arc<dyn PipelineExecutor> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(sentinel_detect::pipeline::FfmpegExecutor::new())
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(UnavailableExecutor)
    }
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/*",
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG 优先, 否则使用 --log-level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = DetectConfig::load(&args.config);
    let (dispatcher, events) = ChannelDispatcher::new(config.event_queue_capacity);
    let plugin = DetectPlugin::builder(
        Arc::new(MotionBackend::new()),
        executor(),
        Arc::new(dispatcher),
    )
    .config(config)
    .build();

    info!("🚀 sentinel-detect 启动, 模型: {}", plugin.model().name);

    let mut params = SessionParams::new()
        .with_duration(args.duration)
        .with_settings(args.settings());
    if let Some(id) = &args.session_id {
        params = params.with_id(id.clone());
    }

    // ========== 图片 ==========
    if let Some(image) = &args.image {
        let path = Path::new(image);
        let data = std::fs::read(path).with_context(|| format!("failed to read {}", image))?;
        let media = MediaObject::new(image_mime(path), data);
        let result = plugin.detect(Some(&media), &params)?;
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    // ========== 视频流 ==========
    let Some(url) = &args.url else {
        bail!("either --url or --image is required");
    };
    let mut input = StreamInput::new(url.clone());
    if let Some(container) = &args.container {
        input = input.with_container(container.clone());
    }

    // 事件输出线程
    thread::Builder::new()
        .name("events".into())
        .spawn(move || {
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!("❌ 事件序列化失败: {}", e),
                }
            }
        })?;

    let session = if args.once {
        let resolution = plugin.resolve_request(RequestKind::Stream, &params)?;
        let session = resolution
            .session
            .context("session was not created")?;
        if resolution.created {
            session.set_running(true);
            plugin.run_ephemeral(&session, None, &input)?;
        }
        session
    } else {
        let status = plugin.detect(Some(&MediaObject::stream(&input)?), &params)?;
        println!("{}", serde_json::to_string(&status)?);
        let id = status.detection_id.unwrap_or_default();
        match plugin.session(&id) {
            Some(session) => session,
            None => return Ok(()),
        }
    };

    let reason = loop {
        if let Some(reason) = session.completion().wait_timeout(Duration::from_secs(1)) {
            break reason;
        }
    };
    info!("🛑 会话 {} 结束: {}", session.id(), reason);

    // 留给事件线程输出最后的终止事件
    thread::sleep(Duration::from_millis(100));
    Ok(())
}
