// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 跟踪配置参数
pub mod detection; // 检测富化与关联
pub mod error; // 错误类型
pub mod input; // 视频探测与解码
pub mod pipeline; // 事件编排
pub mod renderer; // 叠加渲染与帧输出

pub use crate::config::{Args, ScoreFormula, TrackerConfig};
pub use crate::detection::{EnrichedEvent, PartialDetection, PartialEvent, PartialVideo};
pub use crate::error::{Result, TrackerError};
pub use crate::input::{FfmpegBackend, FrameSource, VideoBackend};
pub use crate::pipeline::{CancellationToken, ObjectTracker, RunOutcome, RunState, TrackerHandle};
pub use crate::renderer::{frame_channel, ComposedFrame, FrameSink};

/// 解析事件JSON: 单个事件或事件数组
pub fn parse_events(raw: &str) -> Result<Vec<PartialEvent>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| TrackerError::Input(format!("failed to parse events: {}", e)))?;

    let events = if value.is_array() {
        serde_json::from_value::<Vec<PartialEvent>>(value)
    } else {
        serde_json::from_value::<PartialEvent>(value).map(|event| vec![event])
    };

    events.map_err(|e| TrackerError::Input(format!("failed to parse events: {}", e)))
}

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Utc::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
