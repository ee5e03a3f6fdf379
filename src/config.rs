/// 跟踪配置参数
/// Tracker configuration and command line arguments
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// 默认标签字体; 缺失时渲染器告警并跳过标签
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// 候选评分公式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFormula {
    /// 与上游实现逐字一致: 宽高比自除, 帧距因子平方, 取最低分
    Upstream,
    /// 宽高比与候选比较, 质心因子参与排序, 取最高分
    #[default]
    Balanced,
}

/// 跟踪器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// 录像片段目录 (按文件名解析视频路径)
    pub segments_path: String,
    /// 检测结果在帧索引中向后展开的帧数
    pub detection_stride_frames: i64,
    pub bounding_box_hold_ms: u64,
    pub centroid_hold_ms: u64,
    pub object_lookback_ms: u64,
    pub area_factor_limit: f64,
    pub aspect_ratio_factor_limit: f64,
    pub centroid_distance_factor_limit: f64,
    pub score_formula: ScoreFormula,
    /// 帧输出队列容量 (满时阻塞生产者)
    pub sink_capacity: usize,
    /// 解码线程 → 跟踪线程 的缓冲帧数
    pub decoder_queue_frames: usize,
    /// 等待解码进程产生输出的宽限期
    pub startup_grace_ms: u64,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// 标签字体 (TTF/OTF); 为空或加载失败时不绘制标签
    pub font_path: Option<PathBuf>,
    pub label_scale: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            segments_path: "/srv/target_dir/segments".to_string(),
            detection_stride_frames: 4,
            bounding_box_hold_ms: 100,
            centroid_hold_ms: 10_000,
            object_lookback_ms: 10_000,
            area_factor_limit: 0.25,
            aspect_ratio_factor_limit: 0.25,
            centroid_distance_factor_limit: 0.25,
            score_formula: ScoreFormula::default(),
            sink_capacity: 8,
            decoder_queue_frames: 4,
            startup_grace_ms: 5_000,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            font_path: Some(PathBuf::from(DEFAULT_FONT_PATH)),
            label_scale: 14.0,
        }
    }
}

impl TrackerConfig {
    /// 从JSON文件加载, 缺省字段使用默认值
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            TrackerError::Input(format!("failed to parse config {:?}: {}", path, e))
        })
    }

    /// 去掉末尾的 `/`
    pub fn segments_dir(&self) -> &str {
        self.segments_path.trim_end_matches('/')
    }

    pub fn bounding_box_hold_frames(&self, fps: f64) -> i64 {
        duration_to_frames(self.bounding_box_hold_ms, fps)
    }

    pub fn centroid_hold_frames(&self, fps: f64) -> i64 {
        duration_to_frames(self.centroid_hold_ms, fps)
    }

    pub fn object_lookback_frames(&self, fps: f64) -> i64 {
        duration_to_frames(self.object_lookback_ms, fps)
    }
}

/// 时长换算为帧数 (截断), 至少为1帧
pub fn duration_to_frames(ms: u64, fps: f64) -> i64 {
    ((ms as f64 / 1000.0 * fps) as i64).max(1)
}

/// 目标跟踪程序
#[derive(Parser, Debug)]
#[command(author, version, about = "录像事件目标跟踪与叠加渲染", long_about = None)]
pub struct Args {
    /// 事件JSON文件 (单个事件或事件数组)
    #[arg(short, long)]
    pub event: PathBuf,

    /// JSON配置文件, 命令行参数优先
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 录像片段目录
    #[arg(short, long)]
    pub segments_path: Option<String>,

    /// 标签字体文件
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 评分公式
    #[arg(long, value_enum)]
    pub score_formula: Option<ScoreFormula>,

    /// 帧输出队列容量
    #[arg(long)]
    pub sink_capacity: Option<usize>,

    /// 保存合成帧(PNG)的目录
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// 每N帧保存一张
    #[arg(long, default_value_t = 30)]
    pub dump_every: u64,

    /// 每个事件最多输出N帧后取消
    #[arg(long)]
    pub max_frames: Option<u64>,
}

impl Args {
    pub fn to_config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::from_json_file(path)?,
            None => TrackerConfig::default(),
        };

        if let Some(segments_path) = &self.segments_path {
            config.segments_path = segments_path.clone();
        }
        if let Some(font) = &self.font {
            config.font_path = Some(font.clone());
        }
        if let Some(score_formula) = self.score_formula {
            config.score_formula = score_formula;
        }
        if let Some(sink_capacity) = self.sink_capacity {
            config.sink_capacity = sink_capacity;
        }

        Ok(config)
    }
}
