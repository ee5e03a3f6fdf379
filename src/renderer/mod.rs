/// 渲染输出 (Renderer)
///
/// - Overlay: 在解码帧上叠加检测框/轨迹/标签
/// - Sink:    有界帧通道, 交给消费端显示或保存
pub mod overlay;
pub mod sink;

pub use overlay::{ComposedFrame, OverlayRenderer};
pub use sink::{frame_channel, Delivery, FrameSink};
