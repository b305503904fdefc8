/// 检测服务错误类型
/// Error taxonomy for the detection session core
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    /// 会话不存在 (状态查询 / 续期时)
    #[error("detection session {id} not found")]
    SessionNotFound { id: String },

    /// 重复 detach: 上游生命周期错误
    #[error("pipeline already detached? (session {id})")]
    AlreadyDetached { id: String },

    #[error("pipeline failure: {0}")]
    PipelineFailure(String),

    #[error("invalid media: {0}")]
    Media(String),

    /// 推理后端错误, 原样向调用方传播
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    #[error("malformed media payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image transcode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DetectError>;
