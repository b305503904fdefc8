/// FFmpeg 临时管线执行器
/// Ephemeral pipeline executor built on ez-ffmpeg
///
/// 每个会话一个解码线程:
/// 输入(RTSP/TCP/文件) → 解码 → scale + format → SessionFilter → FrameCallback
use std::thread;
use std::time::Instant;

use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use tracing::{debug, info, warn};

use super::{FrameCallback, PipelineExecutor, PipelineSpec};
use crate::detection::{PixelFormat, VideoFrame};
use crate::error::Result;
use crate::media::VideoSource;
use crate::session::{CompletionReason, CompletionSignal};

/// 基于 ez-ffmpeg 的执行器 (仅CPU软件解码)
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegExecutor;

impl FfmpegExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineExecutor for FfmpegExecutor {
    fn launch(
        &self,
        spec: PipelineSpec,
        callback: FrameCallback,
        completion: CompletionSignal,
    ) -> Result<()> {
        let short_id: String = spec.session_id.chars().take(8).collect();
        let name = format!("pipeline-{}", short_id);
        thread::Builder::new().name(name).spawn(move || {
            info!(session = %spec.session_id, source = %spec.description, "🎬 pipeline starting");
            let reason = match run_pipeline(&spec, callback, completion.clone()) {
                Ok(()) => CompletionReason::Finished,
                Err(e) => {
                    warn!(session = %spec.session_id, error = %e, "❌ pipeline failed");
                    CompletionReason::PipelineFailed(e)
                }
            };
            // 会话可能已被看门狗/停止请求结束, 此时 complete 为空操作
            completion.complete(reason);
            info!(session = %spec.session_id, "pipeline exited");
        })?;
        Ok(())
    }
}

fn ffmpeg_pixel_format(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Rgb => "rgb24",
        PixelFormat::Rgba => "rgba",
        PixelFormat::Bgra => "bgra",
        PixelFormat::I420 => "yuv420p",
        PixelFormat::Gray => "gray",
    }
}

fn run_pipeline(
    spec: &PipelineSpec,
    callback: FrameCallback,
    completion: CompletionSignal,
) -> std::result::Result<(), String> {
    let filter = SessionFilter::new(callback, completion, spec.pixel_format);

    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("session", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let url = spec.source.url();
    let input = match &spec.source {
        VideoSource::Rtsp { .. } => Input::new(url).set_input_opts(
            [
                ("rtsp_transport", "tcp"),
                ("buffer_size", "67108864"),
                ("rtsp_flags", "prefer_tcp"),
            ]
            .into(),
        ),
        VideoSource::TransportStream { .. } => {
            Input::new(url).set_input_opts([("f", "mpegts")].into())
        }
        VideoSource::Passthrough { .. } => Input::new(url),
    };

    let scale = format!(
        "scale={}:{},format={}",
        spec.target.width,
        spec.target.height,
        ffmpeg_pixel_format(spec.pixel_format)
    );

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_descs([scale.as_str()].into())
        .output(out)
        .build()
        .map_err(|e| format!("build failed: {}", e))?;

    let sch = ctx.start().map_err(|e| format!("start failed: {}", e))?;
    sch.wait().map_err(|e| format!("{}", e))?;
    Ok(())
}

/// 帧过滤器: AVFrame → VideoFrame → 会话回调
struct SessionFilter {
    callback: FrameCallback,
    completion: CompletionSignal,
    pixel_format: PixelFormat,
    frame_id: u64,
    dropped_frames: u64,
    last: Instant,
    count: u64,
}

impl SessionFilter {
    fn new(
        callback: FrameCallback,
        completion: CompletionSignal,
        pixel_format: PixelFormat,
    ) -> Self {
        Self {
            callback,
            completion,
            pixel_format,
            frame_id: 0,
            dropped_frames: 0,
            last: Instant::now(),
            count: 0,
        }
    }

    /// 按行拷贝首个平面 (去掉 linesize 填充)
    unsafe fn copy_plane(&self, frame: &Frame) -> Option<VideoFrame> {
        let av = &*frame.as_ptr();
        let w = av.width as usize;
        let h = av.height as usize;
        if w == 0 || h == 0 || av.data[0].is_null() {
            return None;
        }

        let row_bytes = w * self.pixel_format.bytes_per_pixel();
        let stride = plane_stride(av.linesize[0], row_bytes)?;

        let mut data = Vec::with_capacity(row_bytes * h);
        for y in 0..h {
            let row = std::slice::from_raw_parts(av.data[0].add(y * stride), row_bytes);
            data.extend_from_slice(row);
        }
        Some(VideoFrame::new(data, w as u32, h as u32, self.pixel_format))
    }
}

/// 行跨度; 负值 (自底向上存储) 或不足一行时拒绝
fn plane_stride(linesize: i32, row_bytes: usize) -> Option<usize> {
    if linesize <= 0 {
        return None;
    }
    let stride = linesize as usize;
    (stride >= row_bytes).then_some(stride)
}

impl FrameFilter for SessionFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> std::result::Result<(), String> {
        debug!(session = self.callback.session().id(), "session filter ready");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<Frame>, String> {
        // 会话已结束 → 停止解码
        if self.completion.is_complete() {
            return Err("detection session ended".to_string());
        }

        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            self.dropped_frames += 1;
            return Ok(None);
        }

        let Some(video_frame) = (unsafe { self.copy_plane(&frame) }) else {
            self.dropped_frames += 1;
            return Ok(None);
        };

        self.frame_id += 1;
        self.count += 1;
        let video_frame = video_frame.with_frame_id(self.frame_id);
        self.callback
            .on_frame(&video_frame)
            .map_err(|e| e.to_string())?;

        if self.last.elapsed().as_secs_f64() >= 5.0 {
            let fps = self.count as f64 / self.last.elapsed().as_secs_f64();
            debug!(
                session = self.callback.session().id(),
                fps,
                dropped = self.dropped_frames,
                "📺 pipeline stats"
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!(session = self.callback.session().id(), "session filter closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_stride() {
        assert_eq!(plane_stride(320, 300), Some(320));
        assert_eq!(plane_stride(300, 300), Some(300));
        assert_eq!(plane_stride(256, 300), None);
        assert_eq!(plane_stride(0, 300), None);
        assert_eq!(plane_stride(-320, 300), None);
    }

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(ffmpeg_pixel_format(PixelFormat::I420), "yuv420p");
        assert_eq!(ffmpeg_pixel_format(PixelFormat::Rgb), "rgb24");
    }
}
