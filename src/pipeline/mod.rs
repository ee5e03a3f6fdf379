/// 事件处理流水线 (Event Processing Pipeline)
///
/// 两线程架构, 通过有界通道通信:
/// - Decoder:      ffmpeg 解码 (独立线程)
/// - Orchestrator: 关联 + 叠加 + 输出 (调用线程)
pub mod cancel;
pub mod orchestrator;

pub use cancel::CancellationToken;
pub use orchestrator::{ObjectTracker, RunOutcome, RunState, TrackerHandle};
