#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 服务配置与命令行参数
pub mod detection; // 推理后端与检测结果
pub mod error; // 错误类型
pub mod events; // 检测事件分发
pub mod media; // 媒体负载解析
pub mod pipeline; // 视频管线与帧回调
pub mod plugin; // 会话编排
pub mod session; // 会话状态与生命周期

use rand::RngCore;

pub use crate::config::{Args, DetectConfig};
pub use crate::detection::{
    BoundingBox, DetectionModel, DetectionResult, FrameGeometry, InferenceBackend, MotionBackend,
    MotionSettings, ObjectDetection, PixelFormat, Size, VideoFrame,
};
pub use crate::error::{DetectError, Result};
pub use crate::events::{ChannelDispatcher, EventDispatcher, NullDispatcher};
pub use crate::media::{MediaObject, RequestKind, StreamInput, VideoSource};
pub use crate::pipeline::{FrameCallback, FrameSource, PipelineExecutor, PipelineSpec};
pub use crate::plugin::{Attachment, DetectPlugin, Resolution, SessionParams};
pub use crate::session::{CompletionReason, CompletionSignal, DetectionSession, SessionRegistry};

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 随机会话 id: `bytes` 个随机字节的十六进制编码
pub fn gen_detection_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_detection_id() {
        let a = gen_detection_id(15);
        let b = gen_detection_id(15);
        assert_eq!(a.len(), 30);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01 之后
        assert!(now_millis() > 1_577_836_800_000);
    }
}
