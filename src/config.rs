//! 检测服务配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::Size;

/// 会话核心配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    // === 流尺寸 ===
    pub default_source_width: u32, // 流未协商尺寸时的默认宽度
    pub default_source_height: u32, // 流未协商尺寸时的默认高度

    // === 会话 ===
    pub detection_id_bytes: usize, // 随机会话id字节数 (十六进制编码后长度翻倍)

    // === 事件 ===
    pub event_queue_capacity: usize, // 事件队列容量
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            default_source_width: 1920,
            default_source_height: 1080,
            detection_id_bytes: 15,
            event_queue_capacity: 256,
        }
    }
}

impl DetectConfig {
    pub fn default_source_size(&self) -> Size {
        Size::new(self.default_source_width, self.default_source_height)
    }

    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }
}

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Sentinel detect - 视频目标检测会话服务", long_about = None)]
pub struct Args {
    /// 视频流地址 (rtsp://, tcp://, 文件路径)
    #[arg(short, long)]
    pub url: Option<String>,

    /// 流容器类型 (例如 mpegts)
    #[arg(long)]
    pub container: Option<String>,

    /// 单张图片检测
    #[arg(short, long)]
    pub image: Option<String>,

    /// 复用已有会话id
    #[arg(short, long)]
    pub session_id: Option<String>,

    /// 会话时长(毫秒), 不续期则自动停止
    #[arg(short, long, default_value_t = 10_000)]
    pub duration: u64,

    /// 首个检测结果后停止
    #[arg(long)]
    pub once: bool,

    /// 运动面积阈值
    #[arg(long, default_value_t = 2000.0)]
    pub area: f64,

    /// 像素变化阈值
    #[arg(long, default_value_t = 25)]
    pub threshold: u8,

    /// 分析间隔(毫秒)
    #[arg(long, default_value_t = 250.0)]
    pub interval: f64,

    /// 配置文件
    #[arg(short, long, default_value = "sentinel_detect.json")]
    pub config: String,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// 运动检测参数 → 会话 settings
    pub fn settings(&self) -> serde_json::Value {
        serde_json::json!({
            "area": self.area,
            "threshold": self.threshold,
            "interval": self.interval,
        })
    }
}
