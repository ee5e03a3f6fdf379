/// 视频后端: 元数据探测 + 帧源
/// Video backend seam between the tracker and the external media tools
use std::path::Path;
use std::time::Duration;

use super::decoder::FrameSource;
use super::probe::probe_video;
use crate::config::TrackerConfig;
use crate::detection::types::{Video, VideoInfo};
use crate::error::Result;
use crate::pipeline::cancel::CancellationToken;

/// 视频后端接口
///
/// 每次 `open` 返回的帧源由调用方独占, 释放时必须回收解码资源.
pub trait VideoBackend: Send + Sync {
    /// 探测视频宽高/帧率/帧数/时长
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// 打开解码流
    fn open(&self, video: &Video, cancel: &CancellationToken) -> Result<FrameSource>;
}

/// 基于 ffprobe/ffmpeg 命令行的后端
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    queue_frames: usize,
    startup_grace: Duration,
}

impl FfmpegBackend {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            queue_frames: config.decoder_queue_frames,
            startup_grace: Duration::from_millis(config.startup_grace_ms),
        }
    }
}

impl VideoBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        probe_video(&self.ffprobe_bin, path)
    }

    fn open(&self, video: &Video, cancel: &CancellationToken) -> Result<FrameSource> {
        FrameSource::spawn_ffmpeg(
            &self.ffmpeg_bin,
            video,
            self.queue_frames,
            self.startup_grace,
            cancel.clone(),
        )
    }
}
