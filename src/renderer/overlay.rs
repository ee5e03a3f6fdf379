/// 叠加渲染: 检测框 / 质心轨迹 / 标签
/// Overlay renderer over decoded RGB24 frames
///
/// 绘制顺序: 检测框(短时保留) → 质心轨迹(长时保留) → 当前帧标签
/// 历史帧颜色按帧距线性衰减, 旧帧先画, 新帧覆盖在上层.
use std::path::Path;

use ab_glyph::FontVec;
use chrono::{DateTime, Utc};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{info, warn};

use crate::config::{duration_to_frames, TrackerConfig};
use crate::detection::types::{Detection, EnrichedEvent};
use crate::error::{Result, TrackerError};

/// 质心标记半径
const CENTROID_RADIUS: i32 = 4;
/// 质心标记线宽
const CENTROID_THICKNESS: i32 = 2;

const LABEL_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// 合成后的输出帧
#[derive(Debug, Clone)]
pub struct ComposedFrame {
    pub frame: i64,
    pub timestamp: DateTime<Utc>,
    pub image: RgbaImage,
}

/// 叠加渲染器, 字体只加载一次, 可跨事件复用
pub struct OverlayRenderer {
    font: Option<FontVec>,
    label_scale: f32,
    bounding_box_hold_ms: u64,
    centroid_hold_ms: u64,
}

impl OverlayRenderer {
    /// 字体缺失时只告警一次, 之后不画标签
    pub fn new(config: &TrackerConfig) -> Self {
        let font = match &config.font_path {
            Some(path) => match load_font(path) {
                Ok(font) => {
                    info!("🔤 标签字体: {:?}", path);
                    Some(font)
                }
                Err(e) => {
                    warn!("⚠️ 无法加载标签字体 {:?}: {}; labels disabled", path, e);
                    None
                }
            },
            None => {
                warn!("⚠️ 未配置标签字体; labels disabled");
                None
            }
        };

        Self {
            font,
            label_scale: config.label_scale,
            bounding_box_hold_ms: config.bounding_box_hold_ms,
            centroid_hold_ms: config.centroid_hold_ms,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 合成第 `frame` 帧
    pub fn compose(&self, raw: &[u8], frame: i64, event: &EnrichedEvent) -> Result<ComposedFrame> {
        let video = &event.video;
        let rgb = RgbImage::from_raw(video.width as u32, video.height as u32, raw.to_vec())
            .ok_or_else(|| {
                TrackerError::Stream(format!(
                    "frame {} has {} bytes, expected {}",
                    frame,
                    raw.len(),
                    video.frame_size()
                ))
            })?;
        let mut image = DynamicImage::ImageRgb8(rgb).into_rgba8();

        // 保留时长按视频帧率换算
        let bounding_box_hold = duration_to_frames(self.bounding_box_hold_ms, video.fps);
        let centroid_hold = duration_to_frames(self.centroid_hold_ms, video.fps);

        for (at, detection) in event.detections_between(frame - bounding_box_hold + 1, frame) {
            let color = Rgba([fade(frame - at, bounding_box_hold), 0, 0, 255]);
            draw_bounding_box(&mut image, detection, color);
        }

        for (at, detection) in event.detections_between(frame - centroid_hold + 1, frame) {
            let v = fade(frame - at, centroid_hold);
            draw_centroid(&mut image, detection, Rgba([v, v, v, 255]));
        }

        if let Some(font) = &self.font {
            let (width, height) = image.dimensions();
            for detection in event.detections_at(frame) {
                let anchor = detection.bottom_left();
                let top = anchor.y - self.label_scale as f64;
                // 完全在画面外的标签不画
                if !within_reach(anchor.x, width) || !within_reach(top, height) {
                    continue;
                }
                draw_text_mut(
                    &mut image,
                    LABEL_COLOR,
                    anchor.x as i32,
                    top as i32,
                    self.label_scale,
                    font,
                    &detection.label(),
                );
            }
        }

        Ok(ComposedFrame {
            frame,
            timestamp: video.frame_timestamp(frame),
            image,
        })
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path)?;
    FontVec::try_from_vec(data)
        .map_err(|e| TrackerError::InvalidInput(format!("invalid font {:?}: {}", path, e)))
}

/// 第 i 个历史帧的亮度: 255 → 0
fn fade(i: i64, hold: i64) -> u8 {
    (255 - 255 * i / hold).clamp(0, 255) as u8
}

/// 坐标夹到画面外一圈 `[-margin, limit + margin]`, 之后的整数运算不会溢出
fn clamp_coordinate(value: f64, limit: u32, margin: i32) -> i32 {
    let margin = margin as f64;
    value.clamp(-margin, limit as f64 + margin) as i32
}

fn within_reach(value: f64, limit: u32) -> bool {
    value > -(limit as f64) && value < 2.0 * limit as f64
}

fn draw_bounding_box(image: &mut RgbaImage, detection: &Detection, color: Rgba<u8>) {
    let (width, height) = image.dimensions();
    let top_left = detection.top_left();
    let bottom_right = detection.bottom_right();

    // 越界的边落在画面外一像素, 不会被画出
    let left = clamp_coordinate(top_left.x, width, 1);
    let top = clamp_coordinate(top_left.y, height, 1);
    let right = clamp_coordinate(bottom_right.x, width, 1);
    let bottom = clamp_coordinate(bottom_right.y, height, 1);

    let rect = Rect::at(left, top).of_size(
        (right - left + 1).max(1) as u32,
        (bottom - top + 1).max(1) as u32,
    );
    draw_hollow_rect_mut(image, rect, color);
}

fn draw_centroid(image: &mut RgbaImage, detection: &Detection, color: Rgba<u8>) {
    let (width, height) = image.dimensions();
    let center = (
        clamp_coordinate(detection.centroid.x, width, 2 * CENTROID_RADIUS),
        clamp_coordinate(detection.centroid.y, height, 2 * CENTROID_RADIUS),
    );
    for offset in 0..CENTROID_THICKNESS {
        draw_hollow_circle_mut(image, center, CENTROID_RADIUS - offset, color);
    }
}
