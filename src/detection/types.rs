// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统数据结构定义
/// Data structures shared by the session core and inference backends
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ========== 几何 ==========

/// 帧尺寸 (宽, 高)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// 源帧与推理输入之间的坐标映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    pub source: Size,
    pub input: Size,
}

impl FrameGeometry {
    pub fn new(source: Size, input: Size) -> Self {
        Self { source, input }
    }

    /// 推理坐标 → 源帧坐标
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        if self.input.width == 0 || self.input.height == 0 {
            return (x, y);
        }
        let scale_x = self.source.width as f32 / self.input.width as f32;
        let scale_y = self.source.height as f32 / self.input.height as f32;
        (x * scale_x, y * scale_y)
    }
}

// ========== 检测结果 ==========

/// 检测框, 序列化为 `[x, y, width, height]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([xmin, ymin, width, height]: [f32; 4]) -> Self {
        Self::new(xmin, ymin, width, height)
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.xmin, b.ymin, b.width, b.height]
    }
}

/// 单个检测目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetection {
    pub class_name: String,
    pub score: f32,
    pub bounding_box: BoundingBox,
}

/// 检测结果 / 会话状态 (请求返回值与事件负载共用)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_id: Option<String>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<ObjectDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_dimensions: Option<Size>,
}

impl DetectionResult {
    /// 纯状态结果 (无检测内容)
    pub fn status(detection_id: impl Into<String>, running: bool) -> Self {
        Self {
            detection_id: Some(detection_id.into()),
            running,
            timestamp: crate::now_millis(),
            ..Default::default()
        }
    }

    pub fn with_detections(detections: Vec<ObjectDetection>, input_dimensions: Size) -> Self {
        Self {
            detections,
            input_dimensions: Some(input_dimensions),
            ..Default::default()
        }
    }

    /// 打上会话 id 与当前时间戳
    pub fn stamp(&mut self, detection_id: &str) {
        self.detection_id = Some(detection_id.to_string());
        self.timestamp = crate::now_millis();
    }
}

// ========== 模型描述 ==========

/// 用户可调参数描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDescriptor {
    pub key: String,
    pub title: String,
    pub description: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: String,
}

/// 检测模型信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionModel {
    pub name: String,
    pub classes: Vec<String>,
    #[serde(default)]
    pub settings: Vec<SettingDescriptor>,
}
