/// 检测系统 (Detection System)
///
/// - InferenceBackend: 推理后端接口 (每种模型一个实现)
/// - MotionBackend:    帧差运动检测
/// - types:            检测结果与几何类型
pub mod backend;
pub mod motion;
pub mod types;

pub use backend::{InferenceBackend, PixelFormat, VideoFrame};
pub use motion::{MotionBackend, MotionSettings};
pub use types::{
    BoundingBox, DetectionModel, DetectionResult, FrameGeometry, ObjectDetection,
    SettingDescriptor, Size,
};
