/// 检测系统 (Detection System)
///
/// 事件检测结果的解析与跟踪
/// - Types:    数据结构
/// - Geometry: 几何文本解析
/// - Enricher: 富化 (帧号/索引)
/// - Tracker:  跨帧关联
pub mod enricher;
pub mod geometry;
pub mod tracker;
pub mod types;

pub use enricher::{enrich_detections, enrich_event, estimate_frame, resolve_video_path};
pub use geometry::parse_geometry;
pub use tracker::{Associator, FactorLimits, Score};
pub use types::{
    Detection, EnrichedEvent, FrameIndex, PartialDetection, PartialEvent, PartialVideo, Point,
    SameClassIndex, Video, VideoInfo,
};
