/// 推理后端统一接口
///
/// 会话核心不解释检测内容, 只通过此 trait 调用具体模型:
/// ```text
/// JPEG图片 → infer_image ─┐
///                         ├→ DetectionResult
/// 视频帧   → infer_frame ─┘
/// ```
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use super::types::{DetectionModel, DetectionResult, FrameGeometry, Size};

/// 像素格式 (传给管线执行器用于缩放/转换)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb,
    Rgba,
    Bgra,
    /// YUV420P, 后端只读取亮度平面
    I420,
    Gray,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb => "RGB",
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::I420 => "I420",
            PixelFormat::Gray => "GRAY8",
        }
    }

    /// 每像素字节数 (I420 按亮度平面计)
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
            PixelFormat::I420 | PixelFormat::Gray => 1,
        }
    }
}

/// 已解码且缩放到推理尺寸的视频帧
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_id: u64,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            pixel_format,
            frame_id: 0,
        }
    }

    pub fn with_frame_id(mut self, frame_id: u64) -> Self {
        self.frame_id = frame_id;
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// 检测模型接口, 每种模型一个实现
pub trait InferenceBackend: Send + Sync {
    /// 模型名称、类别与可调参数
    fn model(&self) -> DetectionModel;

    /// 单张图片检测
    fn infer_image(&self, image: &[u8], settings: Option<&Value>) -> Result<DetectionResult>;

    /// 单帧检测, 返回 None 表示本帧无结果
    fn infer_frame(
        &self,
        session_id: &str,
        frame: &VideoFrame,
        settings: Option<&Value>,
        geometry: &FrameGeometry,
    ) -> Result<Option<DetectionResult>>;

    /// 源尺寸 → 推理输入尺寸
    fn input_geometry(&self, source: Size) -> Size;

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb
    }

    /// 检测事件发出后在帧线程上调用 (可阻塞, 用于限速)
    fn on_event_emitted(&self, _settings: Option<&Value>) {}

    /// 会话结束或 detach 时释放该会话的后端状态
    fn session_ended(&self, _session_id: &str) {}
}
