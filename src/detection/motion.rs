/// 运动检测后端 (帧差法)
/// Motion detection backend based on frame differencing
///
/// 处理流程:
/// 1. I420亮度平面 → GrayImage
/// 2. 高斯模糊
/// 3. 与该会话上一帧做绝对差分
/// 4. 二值化 + 膨胀
/// 5. 外轮廓 → 包围框 → 源帧坐标
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use serde_json::{json, Value};
use tracing::debug;

use super::backend::{InferenceBackend, PixelFormat, VideoFrame};
use super::types::{
    BoundingBox, DetectionModel, DetectionResult, FrameGeometry, ObjectDetection,
    SettingDescriptor, Size,
};

pub const DEFAULT_AREA: f64 = 2000.0;
pub const DEFAULT_THRESHOLD: u8 = 25;
pub const DEFAULT_INTERVAL_MS: f64 = 250.0;

/// 固定推理尺寸 (与其他检测模型一致, 方便共用缩放管线)
pub const MOTION_INPUT_SIZE: Size = Size::new(300, 300);

// 21x21 高斯核对应的 sigma
const BLUR_SIGMA: f32 = 3.5;
// 两次 3x3 膨胀
const DILATE_RADIUS: u8 = 2;

/// 运动检测参数 (来自会话 settings)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSettings {
    /// 触发所需的最小面积 (源帧像素), 0 表示输出全部轮廓
    pub area: f64,
    /// 像素变化阈值
    pub threshold: u8,
    /// 两次分析之间的间隔 (毫秒)
    pub interval: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            area: DEFAULT_AREA,
            threshold: DEFAULT_THRESHOLD,
            interval: DEFAULT_INTERVAL_MS,
        }
    }
}

impl MotionSettings {
    /// 解析 settings, 数字与数字字符串都接受
    pub fn from_settings(settings: Option<&Value>) -> Self {
        let mut parsed = Self::default();
        let Some(settings) = settings else {
            return parsed;
        };
        if let Some(area) = settings.get("area").and_then(as_f64) {
            parsed.area = area;
        }
        if let Some(threshold) = settings.get("threshold").and_then(as_f64) {
            parsed.threshold = threshold.clamp(0.0, 255.0) as u8;
        }
        if let Some(interval) = settings.get("interval").and_then(as_f64) {
            parsed.interval = interval.max(0.0);
        }
        parsed
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 帧差运动检测器
#[derive(Default)]
pub struct MotionBackend {
    // 每个会话的上一帧 (已模糊)
    previous: Mutex<HashMap<String, GrayImage>>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有历史帧的会话数
    pub fn tracked_sessions(&self) -> usize {
        self.previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn detect(
        &self,
        session_id: &str,
        gray: GrayImage,
        settings: &MotionSettings,
        geometry: &FrameGeometry,
    ) -> Option<DetectionResult> {
        let current = gaussian_blur_f32(&gray, BLUR_SIGMA);

        let previous = {
            let mut frames = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
            frames.insert(session_id.to_string(), current.clone())
        };
        // 第一帧只作为参考帧
        let previous = previous.filter(|p| p.dimensions() == current.dimensions())?;

        // 差分 + 二值化
        let mut thresh = GrayImage::new(current.width(), current.height());
        for ((out, a), b) in thresh
            .pixels_mut()
            .zip(previous.pixels())
            .zip(current.pixels())
        {
            let delta = a.0[0].abs_diff(b.0[0]);
            out.0[0] = if delta > settings.threshold { 255 } else { 0 };
        }
        let dilated = dilate(&thresh, Norm::LInf, DILATE_RADIUS);

        let mut detections = Vec::new();
        for contour in find_contours::<i32>(&dilated) {
            if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                continue;
            }
            let Some((x, y, w, h)) = bounding_rect(&contour.points) else {
                continue;
            };

            let (x2, y2) = geometry.to_source((x + w) as f32, (y + h) as f32);
            let (x, y) = geometry.to_source(x as f32, y as f32);
            let w = x2 - x + 1.0;
            let h = y2 - y + 1.0;
            let contour_area = (w * h) as f64;

            if settings.area == 0.0 || contour_area > settings.area {
                detections.push(ObjectDetection {
                    class_name: "motion".to_string(),
                    score: if settings.area == 0.0 {
                        contour_area as f32
                    } else {
                        1.0
                    },
                    bounding_box: BoundingBox::new(x, y, w, h),
                });
            }
        }

        if !detections.is_empty() {
            debug!(session = session_id, count = detections.len(), "motion detected");
        }
        Some(DetectionResult::with_detections(detections, geometry.source))
    }
}

fn bounding_rect(points: &[imageproc::point::Point<i32>]) -> Option<(i32, i32, i32, i32)> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

impl InferenceBackend for MotionBackend {
    fn model(&self) -> DetectionModel {
        DetectionModel {
            name: "sentinel/motion".to_string(),
            classes: vec!["motion".to_string()],
            settings: vec![
                SettingDescriptor {
                    key: "area".into(),
                    title: "Motion Area".into(),
                    description: "The area size required to trigger motion. Higher values (larger areas) are less sensitive. Setting this to 0 will output all matches.".into(),
                    value: json!(DEFAULT_AREA),
                    kind: "number".into(),
                },
                SettingDescriptor {
                    key: "threshold".into(),
                    title: "Motion Threshold".into(),
                    description: "The threshold required to consider a pixel changed. Higher values (larger changes) are less sensitive.".into(),
                    value: json!(DEFAULT_THRESHOLD),
                    kind: "number".into(),
                },
                SettingDescriptor {
                    key: "interval".into(),
                    title: "Frame Analysis Interval".into(),
                    description: "The number of milliseconds to wait between motion analysis.".into(),
                    value: json!(DEFAULT_INTERVAL_MS),
                    kind: "number".into(),
                },
            ],
        }
    }

    fn infer_image(&self, _image: &[u8], _settings: Option<&Value>) -> Result<DetectionResult> {
        bail!("can not run motion detection on jpeg")
    }

    fn infer_frame(
        &self,
        session_id: &str,
        frame: &VideoFrame,
        settings: Option<&Value>,
        geometry: &FrameGeometry,
    ) -> Result<Option<DetectionResult>> {
        let luma_len = frame.width as usize * frame.height as usize;
        if frame.data.len() < luma_len {
            bail!(
                "frame too short: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            );
        }
        let gray = GrayImage::from_raw(frame.width, frame.height, frame.data[..luma_len].to_vec())
            .ok_or_else(|| anyhow!("invalid luma plane {}x{}", frame.width, frame.height))?;

        let settings = MotionSettings::from_settings(settings);
        Ok(self.detect(session_id, gray, &settings, geometry))
    }

    fn input_geometry(&self, _source: Size) -> Size {
        MOTION_INPUT_SIZE
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::I420
    }

    fn on_event_emitted(&self, settings: Option<&Value>) {
        // 帧线程后面有队列, 在这里阻塞只会降低该会话的分析频率
        let interval = MotionSettings::from_settings(settings).interval;
        if interval > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(interval / 1000.0));
        }
    }

    fn session_ended(&self, session_id: &str) {
        self.previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}
