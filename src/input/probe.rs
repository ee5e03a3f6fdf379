/// 视频元数据探测 (ffprobe)
/// Media metadata probe
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use crate::detection::types::VideoInfo;
use crate::error::{Result, TrackerError};

#[derive(Debug, Deserialize)]
struct FfProbeOutput {
    #[serde(default)]
    streams: Vec<FfProbeStream>,
}

#[derive(Debug, Deserialize)]
struct FfProbeStream {
    #[serde(default)]
    width: i64,
    #[serde(default)]
    height: i64,
    #[serde(default)]
    r_frame_rate: String,
    #[serde(default)]
    nb_frames: String,
    #[serde(default)]
    duration: String,
}

/// 运行 ffprobe 并解析第一路视频流
pub fn probe_video(ffprobe_bin: &str, path: &Path) -> Result<VideoInfo> {
    let output = Command::new(ffprobe_bin)
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams", "v:0"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| TrackerError::Probe(format!("failed to run {} for {:?}: {}", ffprobe_bin, path, e)))?;

    if !output.status.success() {
        return Err(TrackerError::Probe(format!(
            "failed to probe {:?}: {} {}",
            path,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// 解析 ffprobe JSON 输出
///
/// 帧率与帧数只取 `"num/den"` 的分子部分; 时长截断到整秒.
pub fn parse_probe_output(raw: &str) -> Result<VideoInfo> {
    let output: FfProbeOutput = serde_json::from_str(raw)
        .map_err(|e| TrackerError::Probe(format!("failed to parse ffprobe output {:?}: {}", raw, e)))?;

    let stream = output
        .streams
        .first()
        .ok_or_else(|| TrackerError::Probe("ffprobe output has no streams".to_string()))?;

    let fps = parse_numerator(&stream.r_frame_rate)?;
    let frames = parse_numerator(&stream.nb_frames)?;

    let duration_seconds: f64 = stream
        .duration
        .trim()
        .parse()
        .map_err(|_| TrackerError::Probe(format!("failed to parse {:?} as float", stream.duration)))?;

    if duration_seconds < 0.0 || !duration_seconds.is_finite() {
        return Err(TrackerError::Probe(format!("invalid duration {:?}", stream.duration)));
    }

    Ok(VideoInfo {
        width: stream.width,
        height: stream.height,
        fps: fps as f64,
        frames,
        duration: Duration::from_secs(duration_seconds.trunc() as u64),
    })
}

fn parse_numerator(raw: &str) -> Result<i64> {
    let numerator = raw.split('/').next().unwrap_or_default().trim();
    numerator
        .parse()
        .map_err(|_| TrackerError::Probe(format!("failed to parse left portion of {:?} as int", raw)))
}
