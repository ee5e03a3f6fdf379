/// 事件跟踪数据结构定义
/// Data structures for event tracking
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========== 几何 ==========

/// 源视频像素坐标系中的点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 归一化到 0-1 (按帧宽高)
    pub fn normalize(&self, width: f64, height: f64) -> Point {
        Point::new(self.x / width, self.y / height)
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

// ========== 输入 (上游提供) ==========

/// 事件引用的原始视频
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialVideo {
    #[serde(default)]
    pub id: i64,
    pub file_path: String,
    #[serde(default)]
    pub camera_id: i64,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

/// 未处理的检测结果 (几何仍为文本)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDetection {
    #[serde(default)]
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// `"(x,y)"`
    #[serde(rename = "centroid")]
    pub raw_centroid: String,
    /// `"(x,y),(x,y),(x,y),(x,y)"`
    #[serde(rename = "bounding_box")]
    pub raw_bounding_box: String,
    pub class_id: i64,
    pub class_name: String,
    pub score: f64,
}

/// 待跟踪事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialEvent {
    #[serde(default)]
    pub id: i64,
    pub original_video: PartialVideo,
    #[serde(default)]
    pub detections: Vec<PartialDetection>,
}

// ========== 富化结果 ==========

/// 视频探测结果
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: i64,
    pub height: i64,
    pub fps: f64,
    pub frames: i64,
    pub duration: Duration,
}

/// 已解析的视频 (富化后不可变)
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub path: PathBuf,
    pub width: i64,
    pub height: i64,
    pub fps: f64,
    pub frame_count: i64,
    pub duration: Duration,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

impl Video {
    /// 单帧 RGB24 字节数
    pub fn frame_size(&self) -> usize {
        (self.width * self.height * 3) as usize
    }

    /// 第 `frame` 帧对应的时间戳
    pub fn frame_timestamp(&self, frame: i64) -> DateTime<Utc> {
        let nanos = (frame as f64 / self.fps * 1_000_000_000.0) as i64;
        self.start_timestamp + chrono::Duration::nanoseconds(nanos)
    }

    pub fn is_enriched(&self) -> bool {
        !self.path.as_os_str().is_empty()
            && !self.duration.is_zero()
            && self.width > 0
            && self.height > 0
    }
}

/// 检测结果 (几何已解析, 帧号已估计)
///
/// 除 `track_id` 外所有字段在富化后只读; `track_id` 由关联引擎写入一次.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub raw_centroid: String,
    pub raw_bounding_box: String,
    pub class_id: i64,
    pub class_name: String,
    pub score: f64,
    pub centroid: Point,
    /// 左上, 右上, 右下, 左下
    pub bounding_box: [Point; 4],
    pub width: f64,
    pub height: f64,
    pub area: f64,
    pub aspect_ratio: f64,
    /// 1-based
    pub frame: i64,
    /// 0 表示尚未关联
    pub track_id: i64,
}

impl Detection {
    pub fn top_left(&self) -> Point {
        self.bounding_box[0]
    }

    pub fn bottom_right(&self) -> Point {
        self.bounding_box[2]
    }

    /// 标签锚点
    pub fn bottom_left(&self) -> Point {
        self.bounding_box[3]
    }

    pub fn label(&self) -> String {
        format!(
            "{} ({}) @ {:.2}%",
            self.class_name,
            self.track_id,
            self.score * 100.0
        )
    }
}

/// 帧号 → 该帧可见的检测 (下标指向 `EnrichedEvent::detections`)
pub type FrameIndex = BTreeMap<i64, Vec<usize>>;

/// 帧号 → 同类别的其他检测
pub type SameClassIndex = BTreeMap<i64, Vec<usize>>;

/// 富化后的事件, 由一次跟踪运行独占
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    pub id: i64,
    pub video: Video,
    pub detections: Vec<Detection>,
    pub by_frame: FrameIndex,
    /// 与 `detections` 一一对应
    pub same_class: Vec<SameClassIndex>,
}

impl EnrichedEvent {
    /// 某帧可见的检测下标
    pub fn indices_at(&self, frame: i64) -> &[usize] {
        self.by_frame.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn detections_at(&self, frame: i64) -> impl Iterator<Item = &Detection> + '_ {
        self.indices_at(frame).iter().map(|&i| &self.detections[i])
    }

    /// `[first, last]` 内各帧可见的检测, 帧号升序
    pub fn detections_between(
        &self,
        first: i64,
        last: i64,
    ) -> impl Iterator<Item = (i64, &Detection)> + '_ {
        let frames = if first <= last {
            Some(self.by_frame.range(first..=last))
        } else {
            None
        };

        frames
            .into_iter()
            .flatten()
            .flat_map(move |(&frame, indices)| {
                indices.iter().map(move |&i| (frame, &self.detections[i]))
            })
    }
}
