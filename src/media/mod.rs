/// 媒体对象与解析
/// Media objects, request kinds and the media resolver
pub mod source;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::{DetectError, Result};

pub use source::{MediaStreamOptions, StreamInput, VideoSource, VideoStreamOptions};

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_STREAM_URL: &str = "application/x-media-stream-url";

/// 不透明媒体句柄: MIME 类型 + 负载
#[derive(Debug, Clone, PartialEq)]
pub struct MediaObject {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl MediaObject {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self::new(MIME_JPEG, data)
    }

    /// 以 JSON 负载描述的视频流
    pub fn stream(input: &StreamInput) -> Result<Self> {
        Ok(Self::new(MIME_STREAM_URL, serde_json::to_vec(input)?))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// 请求目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// 无媒体: 纯状态 / 停止请求
    Absent,
    /// 单张图片
    Image,
    /// 视频流
    Stream,
    /// attach 路径: 有数据源但由外部管线提供
    Probe,
}

impl RequestKind {
    pub fn of(media: Option<&MediaObject>) -> Self {
        match media {
            None => RequestKind::Absent,
            Some(m) if m.is_image() => RequestKind::Image,
            Some(_) => RequestKind::Stream,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, RequestKind::Image)
    }

    pub fn has_media(&self) -> bool {
        !matches!(self, RequestKind::Absent)
    }
}

/// 媒体解析接口
pub trait MediaResolver: Send + Sync {
    /// 图片 → JPEG 字节
    fn image_bytes(&self, media: &MediaObject) -> Result<Vec<u8>>;

    /// 视频流 → 结构化描述
    fn stream_input(&self, media: &MediaObject) -> Result<StreamInput>;
}

/// 默认解析器: JPEG 透传, 其他图片转码; 流负载为 JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMediaResolver;

impl MediaResolver for DefaultMediaResolver {
    fn image_bytes(&self, media: &MediaObject) -> Result<Vec<u8>> {
        if !media.is_image() {
            return Err(DetectError::Media(format!(
                "expected image, got {}",
                media.mime_type
            )));
        }
        if media.mime_type == MIME_JPEG {
            return Ok(media.data.clone());
        }

        let decoded = image::load_from_memory(&media.data)?;
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(decoded.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?;
        Ok(out.into_inner())
    }

    fn stream_input(&self, media: &MediaObject) -> Result<StreamInput> {
        if media.is_image() {
            return Err(DetectError::Media(format!(
                "expected stream, got {}",
                media.mime_type
            )));
        }
        let input: StreamInput = serde_json::from_slice(&media.data)?;
        if input.url.trim().is_empty() {
            return Err(DetectError::Media("stream url is empty".into()));
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_request_kind() {
        assert_eq!(RequestKind::of(None), RequestKind::Absent);
        assert_eq!(
            RequestKind::of(Some(&MediaObject::jpeg(vec![]))),
            RequestKind::Image
        );
        let stream = MediaObject::stream(&StreamInput::new("rtsp://a")).unwrap();
        assert_eq!(RequestKind::of(Some(&stream)), RequestKind::Stream);
        assert!(RequestKind::Probe.has_media());
        assert!(!RequestKind::Absent.has_media());
    }

    #[test]
    fn test_jpeg_passthrough() {
        let media = MediaObject::jpeg(vec![1, 2, 3]);
        assert_eq!(DefaultMediaResolver.image_bytes(&media).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_png_transcoded_to_jpeg() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let media = MediaObject::new("image/png", png.into_inner());
        let jpeg = DefaultMediaResolver.image_bytes(&media).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_stream_roundtrip_and_errors() {
        let input = StreamInput::new("rtsp://cam/1").with_size(640, 480);
        let media = MediaObject::stream(&input).unwrap();
        assert_eq!(DefaultMediaResolver.stream_input(&media).unwrap(), input);

        let bad = MediaObject::new(MIME_STREAM_URL, b"not json".to_vec());
        assert!(matches!(
            DefaultMediaResolver.stream_input(&bad),
            Err(DetectError::Json(_))
        ));
        assert!(DefaultMediaResolver
            .stream_input(&MediaObject::jpeg(vec![]))
            .is_err());
    }
}
