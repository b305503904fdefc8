/// 视频流描述 → 管线源描述
/// Stream descriptor parsing and source-description translation
///
/// - mpegts + tcp://host:port → tcpclientsrc + tsdemux
/// - rtsp://...               → rtspsrc + rtph264depay + h264parse
/// - 其他                      → 原样透传
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::detection::Size;

static TCP_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^tcp://\[?(?P<host>[^\]/:]+)\]?:(?P<port>\d{1,5})(?:/.*)?$")
        .unwrap_or_else(|e| panic!("invalid tcp url pattern: {e}"))
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamOptions {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaStreamOptions {
    #[serde(default)]
    pub video: Option<VideoStreamOptions>,
}

/// 媒体解析后的流输入描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInput {
    pub url: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub media_stream_options: Option<MediaStreamOptions>,
}

impl StreamInput {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            container: None,
            media_stream_options: None,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.media_stream_options = Some(MediaStreamOptions {
            video: Some(VideoStreamOptions {
                width: Some(width),
                height: Some(height),
            }),
        });
        self
    }

    /// 协商得到的源尺寸, 缺失的维度使用默认值
    pub fn source_size(&self, default: Size) -> Size {
        let video = self
            .media_stream_options
            .as_ref()
            .and_then(|o| o.video.as_ref());
        Size::new(
            video.and_then(|v| v.width).filter(|w| *w > 0).unwrap_or(default.width),
            video
                .and_then(|v| v.height)
                .filter(|h| *h > 0)
                .unwrap_or(default.height),
        )
    }

    pub fn video_source(&self) -> VideoSource {
        VideoSource::from_input(self)
    }
}

/// 视频源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// TCP 上的 MPEG-TS
    TransportStream { host: String, port: u16 },
    /// RTSP (H.264)
    Rtsp { url: String },
    /// 交给管线执行器自己处理
    Passthrough { url: String },
}

impl VideoSource {
    pub fn from_input(input: &StreamInput) -> Self {
        let url = input.url.trim();
        if input.container.as_deref() == Some("mpegts") && url.starts_with("tcp://") {
            if let Some(caps) = TCP_URL.captures(url) {
                let port = caps["port"].parse::<u16>().ok();
                if let Some(port) = port {
                    return VideoSource::TransportStream {
                        host: caps["host"].to_string(),
                        port,
                    };
                }
            }
        } else if url.starts_with("rtsp") {
            return VideoSource::Rtsp {
                url: url.to_string(),
            };
        }
        VideoSource::Passthrough {
            url: url.to_string(),
        }
    }

    /// 源地址 (供直接打开 URL 的执行器使用)
    pub fn url(&self) -> String {
        match self {
            VideoSource::TransportStream { host, port } => format!("tcp://{}:{}", host, port),
            VideoSource::Rtsp { url } | VideoSource::Passthrough { url } => url.clone(),
        }
    }

    /// 管线源描述片段, 末尾统一接解码
    pub fn description(&self) -> String {
        let mut src = match self {
            VideoSource::TransportStream { host, port } => {
                format!("tcpclientsrc port={} host={} ! tsdemux", port, host)
            }
            VideoSource::Rtsp { url } => {
                format!("rtspsrc location={} ! rtph264depay ! h264parse", url)
            }
            VideoSource::Passthrough { url } => url.clone(),
        };
        src.push_str(" ! decodebin ");
        src
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_mpegts() {
        let input = StreamInput::new("tcp://127.0.0.1:5000").with_container("mpegts");
        let source = input.video_source();
        assert_eq!(
            source,
            VideoSource::TransportStream {
                host: "127.0.0.1".into(),
                port: 5000
            }
        );
        assert_eq!(
            source.description(),
            "tcpclientsrc port=5000 host=127.0.0.1 ! tsdemux ! decodebin "
        );
        assert_eq!(source.url(), "tcp://127.0.0.1:5000");
    }

    #[test]
    fn test_tcp_without_mpegts_passes_through() {
        let input = StreamInput::new("tcp://127.0.0.1:5000");
        assert_eq!(
            input.video_source().description(),
            "tcp://127.0.0.1:5000 ! decodebin "
        );
    }

    #[test]
    fn test_rtsp() {
        let input = StreamInput::new("rtsp://cam.local/stream1");
        assert_eq!(
            input.video_source().description(),
            "rtspsrc location=rtsp://cam.local/stream1 ! rtph264depay ! h264parse ! decodebin "
        );
    }

    #[test]
    fn test_parse_payload_and_size_defaults() {
        let json = r#"{"url":"rtsp://x/y","container":"rtsp","mediaStreamOptions":{"video":{"width":640}}}"#;
        let input: StreamInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.url, "rtsp://x/y");
        assert_eq!(
            input.source_size(Size::new(1920, 1080)),
            Size::new(640, 1080)
        );

        let bare: StreamInput = serde_json::from_str(r#"{"url":"file.mp4"}"#).unwrap();
        assert_eq!(bare.source_size(Size::new(1920, 1080)), Size::new(1920, 1080));
    }
}
