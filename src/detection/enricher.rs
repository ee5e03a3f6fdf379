//! 检测富化 (Detection Enricher)
//! 职责: PartialEvent → 解析视频路径 → 探测视频参数 → 解析几何 → 估计帧号 → 建立帧索引
//!
//! 任一检测失败即整体失败, 不产生部分结果.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;

use super::geometry::parse_geometry;
use super::types::{
    Detection, EnrichedEvent, FrameIndex, PartialDetection, PartialEvent, Point, SameClassIndex,
    Video,
};
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::input::VideoBackend;

/// 按文件名把事件中的视频路径映射到本地片段目录
pub fn resolve_video_path(segments_dir: &str, file_path: &str) -> PathBuf {
    let file_name = file_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    Path::new(segments_dir.trim_end_matches('/')).join(file_name)
}

/// 富化事件: 失败时事件应被丢弃
pub fn enrich_event(
    event: &PartialEvent,
    config: &TrackerConfig,
    backend: &dyn VideoBackend,
) -> Result<EnrichedEvent> {
    info!(
        "event.ID: {}; preparing original video {:?}...",
        event.id, event.original_video.file_path
    );

    let path = resolve_video_path(config.segments_dir(), &event.original_video.file_path);
    info!(
        "event.ID: {}; adjusted file path for original video is {:?}",
        event.id, path
    );

    let metadata = std::fs::metadata(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            TrackerError::NotFound(format!("{:?} for event.ID: {}", path, event.id))
        }
        _ => TrackerError::Io(e),
    })?;

    if metadata.is_dir() {
        return Err(TrackerError::InvalidInput(format!(
            "expected {:?} to be a file but it was a folder",
            path
        )));
    }

    info!(
        "event.ID: {}; original video is {} MB",
        event.id,
        metadata.len() as f64 / 1_000_000.0
    );

    let info = backend.probe(&path)?;

    let video = Video {
        path,
        width: info.width,
        height: info.height,
        fps: info.fps,
        frame_count: info.frames,
        duration: info.duration,
        start_timestamp: event.original_video.start_timestamp,
        end_timestamp: event.original_video.end_timestamp,
    };

    info!(
        "event.ID: {}; original video is {} frames of {} * {} @ {} FPS for {:?}",
        event.id, video.frame_count, video.width, video.height, video.fps, video.duration
    );

    enrich_detections(event, video, config.detection_stride_frames)
}

/// 解析全部检测并建立索引 (视频参数已知)
pub fn enrich_detections(
    event: &PartialEvent,
    video: Video,
    stride_frames: i64,
) -> Result<EnrichedEvent> {
    info!(
        "event.ID: {}; preparing {} detections...",
        event.id,
        event.detections.len()
    );

    if video.end_timestamp <= video.start_timestamp {
        return Err(TrackerError::Input(format!(
            "event.ID: {}; video time range {} .. {} is empty",
            event.id, video.start_timestamp, video.end_timestamp
        )));
    }

    let detections = event
        .detections
        .iter()
        .map(|partial| enrich_detection(event.id, partial, &video))
        .collect::<Result<Vec<_>>>()?;

    let by_frame = build_frame_index(&detections, stride_frames);
    let same_class = build_same_class_index(&detections);

    info!("event.ID: {}; ready for object tracking.", event.id);

    Ok(EnrichedEvent {
        id: event.id,
        video,
        detections,
        by_frame,
        same_class,
    })
}

fn enrich_detection(event_id: i64, partial: &PartialDetection, video: &Video) -> Result<Detection> {
    let centroid_points = parse_geometry(&partial.raw_centroid).map_err(|e| {
        TrackerError::Geometry(format!(
            "failed to parse centroid {:?} for event.ID: {}: {}",
            partial.raw_centroid, event_id, e
        ))
    })?;

    let centroid = match centroid_points.as_slice() {
        [point] => *point,
        _ => {
            return Err(TrackerError::Geometry(format!(
                "failed to get exactly 1 set of points for centroid {:?} for event.ID: {}",
                partial.raw_centroid, event_id
            )))
        }
    };

    let bounding_box_points = parse_geometry(&partial.raw_bounding_box).map_err(|e| {
        TrackerError::Geometry(format!(
            "failed to parse bounding box {:?} for event.ID: {}: {}",
            partial.raw_bounding_box, event_id, e
        ))
    })?;

    let bounding_box: [Point; 4] = bounding_box_points.as_slice().try_into().map_err(|_| {
        TrackerError::Geometry(format!(
            "expected 4 points for bounding box {:?} for event.ID: {} but got {}",
            partial.raw_bounding_box,
            event_id,
            bounding_box_points.len()
        ))
    })?;

    let height = bounding_box[2].y - bounding_box[0].y;
    let width = bounding_box[2].x - bounding_box[0].x;

    Ok(Detection {
        id: partial.id,
        timestamp: partial.timestamp,
        raw_centroid: partial.raw_centroid.clone(),
        raw_bounding_box: partial.raw_bounding_box.clone(),
        class_id: partial.class_id,
        class_name: partial.class_name.clone(),
        score: partial.score,
        centroid,
        bounding_box,
        width,
        height,
        area: width * height,
        aspect_ratio: width / height,
        frame: estimate_frame(partial.timestamp, video)?,
        track_id: 0,
    })
}

/// 时间戳线性插值到帧号 (1-based)
pub fn estimate_frame(timestamp: DateTime<Utc>, video: &Video) -> Result<i64> {
    let span = (video.end_timestamp - video.start_timestamp).num_nanoseconds();
    let offset = (timestamp - video.start_timestamp).num_nanoseconds();

    match (offset, span) {
        (Some(offset), Some(span)) if span > 0 => {
            let progress = offset as f64 / span as f64;
            Ok((progress * video.frame_count as f64).round() as i64 + 1)
        }
        _ => Err(TrackerError::Input(format!(
            "cannot place {} within {} .. {}",
            timestamp, video.start_timestamp, video.end_timestamp
        ))),
    }
}

/// 每个检测登记在 `[frame, frame + stride - 1]`
fn build_frame_index(detections: &[Detection], stride_frames: i64) -> FrameIndex {
    let mut by_frame = FrameIndex::new();

    for (i, detection) in detections.iter().enumerate() {
        for offset in 0..stride_frames.max(1) {
            by_frame.entry(detection.frame + offset).or_default().push(i);
        }
    }

    by_frame
}

/// 全量两两扫描, 按对方帧号分桶同类别检测 (排除自身)
fn build_same_class_index(detections: &[Detection]) -> Vec<SameClassIndex> {
    detections
        .iter()
        .enumerate()
        .map(|(i, detection)| {
            let mut same_class = SameClassIndex::new();
            for (j, other) in detections.iter().enumerate() {
                if i == j || other.class_id != detection.class_id {
                    continue;
                }
                same_class.entry(other.frame).or_default().push(j);
            }
            same_class
        })
        .collect()
}
