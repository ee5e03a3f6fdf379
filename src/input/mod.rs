/// 视频输入系统 (Video Input System)
///
/// - Probe:   ffprobe 元数据探测
/// - Decoder: ffmpeg 子进程解码为 RGB24 帧流
/// - Backend: 探测与解码的统一接口 (测试中可替换为合成视频)
pub mod backend;
pub mod decoder;
pub mod probe;

pub use backend::{FfmpegBackend, VideoBackend};
pub use decoder::{FrameSource, RawFrame};
pub use probe::{parse_probe_output, probe_video};
