/// 视频处理管线接口 (Video Processing Pipeline)
///
/// 两种管线:
/// - 临时管线: 由本核心通过 PipelineExecutor 启动, 生命周期受会话时长约束
/// - 外部管线: 调用方持有的长期管线 (摄像头), 通过 FrameSource 接入回调
pub mod callback;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use crate::detection::{PixelFormat, Size};
use crate::error::Result;
use crate::media::VideoSource;
use crate::session::CompletionSignal;

pub use callback::FrameCallback;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegExecutor;

/// 启动临时管线所需的全部描述
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub session_id: String,
    pub source: VideoSource,
    /// 管线源描述片段 (含解码)
    pub description: String,
    pub source_size: Size,
    /// 推理输入尺寸 (缩放目标)
    pub target: Size,
    pub pixel_format: PixelFormat,
}

/// 临时管线执行器
///
/// `launch` 必须立即返回; 管线在自己的线程上运行, 每帧调用 `callback`,
/// 自然结束或出错时满足 `completion`. 完成信号被其他路径满足后管线应尽快停止.
pub trait PipelineExecutor: Send + Sync {
    fn launch(
        &self,
        spec: PipelineSpec,
        callback: FrameCallback,
        completion: CompletionSignal,
    ) -> Result<()>;
}

/// 外部持有的长期管线
pub trait FrameSource {
    /// 源帧尺寸
    fn source_size(&self) -> Size;

    /// 把帧输出接到回调上
    fn connect(&self, callback: FrameCallback) -> Result<()>;
}
