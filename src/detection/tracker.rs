//! 关联引擎 (Association Engine)
//! 为每帧新出现的检测分配持久的跟踪ID
//!
//! 流程:
//! 1. 在同类别索引中回看 `lookback` 帧收集候选 (跳过本帧已被占用的ID)
//! 2. 计算 帧距/面积/宽高比/质心距离 因子, 任一超限即淘汰
//! 3. 按综合分排序选出最佳候选, 继承其ID; 无候选则分配新ID
//! 4. 本帧内登记已占用ID, 同帧两个检测不会得到同一ID
//!
//! 跨帧只保留"下一个ID"计数器, 历史全部来自富化阶段建立的索引.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use super::types::EnrichedEvent;
use crate::config::{ScoreFormula, TrackerConfig};
use crate::error::{Result, TrackerError};

// ========== 评分 ==========

/// 候选评分 (每次匹配临时生成)
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// 候选检测的ID
    pub detection_id: i64,
    /// 候选检测在事件中的下标
    pub candidate: usize,
    pub frame_distance_factor: f64,
    pub area_factor: f64,
    pub aspect_ratio_factor: f64,
    pub centroid_distance_factor: f64,
}

/// 各因子允许偏离 1.0 的上限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorLimits {
    pub area: f64,
    pub aspect_ratio: f64,
    pub centroid_distance: f64,
}

impl FactorLimits {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            area: config.area_factor_limit,
            aspect_ratio: config.aspect_ratio_factor_limit,
            centroid_distance: config.centroid_distance_factor_limit,
        }
    }
}

impl Score {
    /// 所有条件都满足才可接受; NaN 一律淘汰
    ///
    /// 零高度框在 `Upstream` 下宽高比自除得 NaN, 此处淘汰, 而上游比较 `1-NaN > limit` 为假会放行.
    pub fn is_admissible(&self, limits: &FactorLimits) -> bool {
        1.0 - self.area_factor <= limits.area
            && 1.0 - self.aspect_ratio_factor <= limits.aspect_ratio
            && 1.0 - self.centroid_distance_factor <= limits.centroid_distance
    }

    /// 综合分
    pub fn composite(&self, formula: ScoreFormula) -> f64 {
        match formula {
            ScoreFormula::Upstream => {
                let or_one = |factor: f64| if factor == 0.0 { 1.0 } else { factor };
                let frame_distance = or_one(self.frame_distance_factor);
                frame_distance
                    * or_one(self.area_factor)
                    * or_one(self.aspect_ratio_factor)
                    * frame_distance
            }
            ScoreFormula::Balanced => {
                self.frame_distance_factor
                    * similarity(self.area_factor)
                    * similarity(self.aspect_ratio_factor)
                    * self.centroid_distance_factor
            }
        }
    }
}

/// 比值 → 0-1 相似度
fn similarity(ratio: f64) -> f64 {
    if ratio > 1.0 {
        1.0 / ratio
    } else {
        ratio
    }
}

// ========== 关联器 ==========

/// 单次运行的关联状态
#[derive(Debug, Clone)]
pub struct Associator {
    lookback_frames: i64,
    limits: FactorLimits,
    formula: ScoreFormula,
    last_track_id: i64,
}

impl Associator {
    pub fn new(config: &TrackerConfig, fps: f64) -> Self {
        Self {
            lookback_frames: config.object_lookback_frames(fps),
            limits: FactorLimits::from_config(config),
            formula: config.score_formula,
            last_track_id: 0,
        }
    }

    pub fn lookback_frames(&self) -> i64 {
        self.lookback_frames
    }

    /// 已分配的ID数量 (ID 从 1 开始连续分配)
    pub fn issued(&self) -> i64 {
        self.last_track_id
    }

    /// 关联第 `frame` 帧中尚未分配ID的检测, 返回本帧处理的数量
    pub fn associate_frame(&mut self, event: &mut EnrichedEvent, frame: i64) -> Result<usize> {
        if !event.video.is_enriched() {
            return Err(TrackerError::NotEnriched(event.id));
        }

        let pending: Vec<usize> = event
            .indices_at(frame)
            .iter()
            .copied()
            .filter(|&i| event.detections[i].track_id == 0)
            .collect();

        let mut claimed = HashSet::new();
        for &index in &pending {
            self.associate(event, index, frame, &mut claimed);
        }

        Ok(pending.len())
    }

    /// 流结束后处理从未被播放到的检测 (按帧号升序)
    pub fn flush(&mut self, event: &mut EnrichedEvent) -> Result<usize> {
        if !event.video.is_enriched() {
            return Err(TrackerError::NotEnriched(event.id));
        }

        let mut by_frame: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, detection) in event.detections.iter().enumerate() {
            if detection.track_id == 0 {
                by_frame.entry(detection.frame).or_default().push(i);
            }
        }

        let mut count = 0;
        for (frame, indices) in by_frame {
            let mut claimed = HashSet::new();
            for index in indices {
                self.associate(event, index, frame, &mut claimed);
                count += 1;
            }
        }

        Ok(count)
    }

    fn associate(
        &mut self,
        event: &mut EnrichedEvent,
        index: usize,
        frame: i64,
        claimed: &mut HashSet<i64>,
    ) {
        let scores = self.score_candidates(event, index, frame, claimed);
        let score_count = scores.len();

        let track_id = match self.select_best(scores) {
            Some(best) => event.detections[best.candidate].track_id,
            None => {
                self.last_track_id += 1;
                self.last_track_id
            }
        };

        let detection = &mut event.detections[index];
        detection.track_id = track_id;
        claimed.insert(track_id);

        debug!(
            "{} ({}); {} ({}) has {} scores",
            event.video.frame_timestamp(frame),
            frame,
            detection.class_name,
            detection.track_id,
            score_count
        );
    }

    /// 回看窗口内的可接受候选
    fn score_candidates(
        &self,
        event: &EnrichedEvent,
        index: usize,
        frame: i64,
        claimed: &HashSet<i64>,
    ) -> Vec<Score> {
        let detection = &event.detections[index];
        let width = event.video.width as f64;
        let height = event.video.height as f64;
        let centroid = detection.centroid.normalize(width, height);

        let mut scores = Vec::new();

        // 窗口 [max(frame - lookback, 1), frame - 1], 由近及远
        let first = (frame - self.lookback_frames).max(1);
        if first >= frame {
            return scores;
        }

        for candidates in event.same_class[index].range(first..frame).rev().map(|(_, c)| c) {
            for &candidate in candidates {
                let other = &event.detections[candidate];

                // 尚未关联, 或ID已被本帧其他检测占用
                if other.track_id == 0 || claimed.contains(&other.track_id) {
                    continue;
                }

                let aspect_ratio_factor = match self.formula {
                    ScoreFormula::Upstream => detection.aspect_ratio / detection.aspect_ratio,
                    ScoreFormula::Balanced => detection.aspect_ratio / other.aspect_ratio,
                };

                let score = Score {
                    detection_id: other.id,
                    candidate,
                    frame_distance_factor: 1.0
                        - (frame - other.frame) as f64 / self.lookback_frames as f64,
                    area_factor: detection.area / other.area,
                    aspect_ratio_factor,
                    centroid_distance_factor: 1.0
                        - centroid.distance(&other.centroid.normalize(width, height)),
                };

                if score.is_admissible(&self.limits) {
                    scores.push(score);
                }
            }
        }

        scores
    }

    /// 稳定排序: 综合分, 再按候选ID升序
    fn select_best(&self, mut scores: Vec<Score>) -> Option<Score> {
        let formula = self.formula;

        scores.sort_by(|a, b| {
            let (a_score, b_score) = (a.composite(formula), b.composite(formula));
            let by_score = match formula {
                ScoreFormula::Upstream => a_score.total_cmp(&b_score),
                ScoreFormula::Balanced => b_score.total_cmp(&a_score),
            };
            by_score.then(a.detection_id.cmp(&b.detection_id))
        });

        scores.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::enricher::enrich_detections;
    use crate::detection::types::{PartialDetection, PartialEvent, PartialVideo, Video};
    use chrono::{DateTime, TimeZone, Utc};
    use std::path::PathBuf;
    use std::time::Duration;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, 7, 56, 1).unwrap()
    }

    /// 150帧 / 30FPS / 5秒 / 640x480
    fn video() -> Video {
        Video {
            path: PathBuf::from("/tmp/segment.mp4"),
            width: 640,
            height: 480,
            fps: 30.0,
            frame_count: 150,
            duration: Duration::from_secs(5),
            start_timestamp: start(),
            end_timestamp: start() + chrono::Duration::seconds(5),
        }
    }

    /// 在第 `frame` 帧、左上角 (x, y)、尺寸 w*h 的检测
    fn at(id: i64, frame: i64, class_id: i64, x: f64, y: f64, w: f64, h: f64) -> PartialDetection {
        PartialDetection {
            id,
            timestamp: start() + chrono::Duration::nanoseconds((frame - 1) * 33_333_333),
            raw_centroid: format!("({},{})", x + w / 2.0, y + h / 2.0),
            raw_bounding_box: format!(
                "({},{}),({},{}),({},{}),({},{})",
                x,
                y,
                x + w,
                y,
                x + w,
                y + h,
                x,
                y + h
            ),
            class_id,
            class_name: if class_id == 0 { "person" } else { "car" }.to_string(),
            score: 0.9,
        }
    }

    fn enriched(detections: Vec<PartialDetection>) -> EnrichedEvent {
        let event = PartialEvent {
            id: 1,
            original_video: PartialVideo {
                id: 1,
                file_path: "segment.mp4".to_string(),
                camera_id: 1,
                start_timestamp: start(),
                end_timestamp: start() + chrono::Duration::seconds(5),
            },
            detections,
        };
        enrich_detections(&event, video(), 4).unwrap()
    }

    fn config(formula: ScoreFormula) -> TrackerConfig {
        TrackerConfig {
            score_formula: formula,
            ..TrackerConfig::default()
        }
    }

    fn run(event: &mut EnrichedEvent, associator: &mut Associator, frames: i64) {
        for frame in 1..=frames {
            associator.associate_frame(event, frame).unwrap();
        }
    }

    fn track(event: &EnrichedEvent, id: i64) -> i64 {
        event.detections.iter().find(|d| d.id == id).unwrap().track_id
    }

    #[test]
    fn test_same_class_inherits_and_other_class_is_new() {
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 11, 2, 300.0, 200.0, 80.0, 40.0),
            at(3, 12, 0, 102.0, 101.0, 40.0, 80.0),
        ]);
        assert_eq!(event.detections.iter().map(|d| d.frame).collect::<Vec<_>>(), vec![10, 11, 12]);

        for formula in [ScoreFormula::Upstream, ScoreFormula::Balanced] {
            event.detections.iter_mut().for_each(|d| d.track_id = 0);
            let mut associator = Associator::new(&config(formula), 30.0);
            run(&mut event, &mut associator, 150);

            assert_eq!(track(&event, 1), 1);
            assert_eq!(track(&event, 2), 2);
            assert_eq!(track(&event, 3), 1);
            assert_eq!(associator.issued(), 2);
        }
    }

    #[test]
    fn test_track_id_written_once() {
        let mut event = enriched(vec![at(1, 10, 0, 100.0, 100.0, 40.0, 80.0)]);
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);

        // 步长窗口内 10..13 都能看到该检测, 只在第10帧处理
        assert_eq!(associator.associate_frame(&mut event, 10).unwrap(), 1);
        assert_eq!(associator.associate_frame(&mut event, 11).unwrap(), 0);
        assert_eq!(associator.associate_frame(&mut event, 13).unwrap(), 0);
        assert_eq!(event.detections[0].track_id, 1);
        assert_eq!(associator.issued(), 1);
    }

    #[test]
    fn test_in_frame_collision_avoidance() {
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 10, 0, 110.0, 100.0, 40.0, 80.0),
            at(3, 12, 0, 104.0, 100.0, 40.0, 80.0),
            at(4, 12, 0, 106.0, 100.0, 40.0, 80.0),
        ]);
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut associator, 20);

        // 同帧不共享ID
        assert_ne!(track(&event, 1), track(&event, 2));
        assert_ne!(track(&event, 3), track(&event, 4));
        let mut inherited = vec![track(&event, 3), track(&event, 4)];
        inherited.sort();
        assert_eq!(inherited, vec![1, 2]);
    }

    #[test]
    fn test_outside_lookback_window_is_new_track() {
        let config = TrackerConfig {
            object_lookback_ms: 100,
            ..config(ScoreFormula::Balanced)
        };
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 14, 0, 100.0, 100.0, 40.0, 80.0),
        ]);
        let mut associator = Associator::new(&config, 30.0);
        assert_eq!(associator.lookback_frames(), 3);
        run(&mut event, &mut associator, 20);
        assert_eq!(track(&event, 1), 1);
        assert_eq!(track(&event, 2), 2);
    }

    #[test]
    fn test_area_and_centroid_limits() {
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 80.0),
            // 面积减半
            at(2, 11, 0, 100.0, 100.0, 20.0, 80.0),
            // 质心偏移超过 0.25
            at(3, 20, 0, 400.0, 100.0, 40.0, 80.0),
        ]);
        let mut associator = Associator::new(&config(ScoreFormula::Upstream), 30.0);
        run(&mut event, &mut associator, 30);
        assert_eq!(associator.issued(), 3);
    }

    #[test]
    fn test_aspect_ratio_formula() {
        // 面积与质心相同, 宽高比 2.0 → 0.5
        let detections = vec![
            at(1, 10, 0, 80.0, 120.0, 80.0, 40.0),
            at(2, 12, 0, 100.0, 100.0, 40.0, 80.0),
        ];

        let mut event = enriched(detections.clone());
        let mut upstream = Associator::new(&config(ScoreFormula::Upstream), 30.0);
        run(&mut event, &mut upstream, 20);
        assert_eq!(track(&event, 2), 1, "upstream compares a detection with itself");

        let mut event = enriched(detections);
        let mut balanced = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut balanced, 20);
        assert_eq!(track(&event, 2), 2, "balanced rejects the aspect ratio change");
    }

    #[test]
    fn test_composite_ranking() {
        // 两条互不匹配的轨迹 (质心相距 0.3), 新检测位于二者正中间
        let detections = vec![
            at(1, 5, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 9, 0, 292.0, 100.0, 40.0, 80.0),
            at(3, 10, 0, 196.0, 100.0, 40.0, 80.0),
        ];

        let mut event = enriched(detections.clone());
        let mut upstream = Associator::new(&config(ScoreFormula::Upstream), 30.0);
        run(&mut event, &mut upstream, 10);
        assert_eq!((track(&event, 1), track(&event, 2)), (1, 2));
        // 最低综合分 (帧距最远) 胜出
        assert_eq!(track(&event, 3), 1);

        let mut event = enriched(detections);
        let mut balanced = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut balanced, 10);
        assert_eq!(track(&event, 3), 2);
    }

    #[test]
    fn test_tie_break_by_candidate_id() {
        // 质心 x = 280 / 120 / 200, 归一化后距离都精确为 0.125
        let mut event = enriched(vec![
            at(12, 5, 0, 260.0, 100.0, 40.0, 80.0),
            at(11, 5, 0, 100.0, 100.0, 40.0, 80.0),
            at(13, 10, 0, 180.0, 100.0, 40.0, 80.0),
        ]);
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut associator, 10);

        assert_eq!(track(&event, 12), 1);
        assert_eq!(track(&event, 11), 2);
        // 综合分相同, 候选ID较小者 (11) 胜出
        assert_eq!(track(&event, 13), 2);
    }

    #[test]
    fn test_score_factors() {
        let score = Score {
            detection_id: 1,
            candidate: 0,
            frame_distance_factor: 0.5,
            area_factor: 0.8,
            aspect_ratio_factor: 1.25,
            centroid_distance_factor: 0.9,
        };
        let limits = FactorLimits {
            area: 0.25,
            aspect_ratio: 0.25,
            centroid_distance: 0.25,
        };
        assert!(score.is_admissible(&limits));
        approx::assert_abs_diff_eq!(score.composite(ScoreFormula::Upstream), 0.25, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(
            score.composite(ScoreFormula::Balanced),
            0.5 * 0.8 * 0.8 * 0.9,
            epsilon = 1e-12
        );

        let nan = Score {
            area_factor: f64::NAN,
            ..score
        };
        assert!(!nan.is_admissible(&limits));
    }

    #[test]
    fn test_flush_assigns_unreached_detections() {
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 140, 0, 100.0, 100.0, 40.0, 80.0),
            at(3, 142, 0, 100.0, 100.0, 40.0, 80.0),
        ]);
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut associator, 100);
        assert_eq!(associator.flush(&mut event).unwrap(), 2);

        assert!(event.detections.iter().all(|d| d.track_id != 0));
        assert_eq!(track(&event, 3), track(&event, 2));
        assert_eq!(associator.flush(&mut event).unwrap(), 0);
    }

    #[test]
    fn test_flush_before_first_frame() {
        // 第 -5 帧, 步长窗口 -5..-2 永远不会被播放到
        let mut event = enriched(vec![
            at(1, -5, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 10, 0, 100.0, 100.0, 40.0, 80.0),
        ]);
        assert_eq!(event.detections[0].frame, -5);

        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut associator, 150);
        assert_eq!(track(&event, 1), 0);

        assert_eq!(associator.flush(&mut event).unwrap(), 1);
        assert_eq!(track(&event, 2), 1);
        assert_eq!(track(&event, 1), 2);
    }

    #[test]
    fn test_wide_lookback_window() {
        // 30000/1001 只取分子: 回看窗口 300000 帧
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 80.0),
            at(2, 120, 0, 101.0, 100.0, 40.0, 80.0),
        ]);
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30000.0);
        assert_eq!(associator.lookback_frames(), 300_000);

        run(&mut event, &mut associator, 150);
        assert_eq!(track(&event, 2), track(&event, 1));
        assert_eq!(associator.issued(), 1);
    }

    #[test]
    fn test_upstream_rejects_zero_height_box() {
        let mut event = enriched(vec![
            at(1, 10, 0, 100.0, 100.0, 40.0, 0.0),
            at(2, 12, 0, 100.0, 100.0, 40.0, 0.0),
        ]);
        let mut associator = Associator::new(&config(ScoreFormula::Upstream), 30.0);
        run(&mut event, &mut associator, 20);
        assert_eq!(associator.issued(), 2);
    }

    #[test]
    fn test_unenriched_event_is_error() {
        let mut event = enriched(vec![]);
        event.video.width = 0;
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        assert!(matches!(
            associator.associate_frame(&mut event, 1),
            Err(TrackerError::NotEnriched(1))
        ));
    }

    #[test]
    fn test_invariants_over_crowded_scene() {
        // 简单线性同余生成器, 保证可复现
        let mut seed: u64 = 42;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        let detections: Vec<PartialDetection> = (0..120)
            .map(|id| {
                at(
                    id,
                    1 + next(150) as i64,
                    next(3) as i64,
                    next(560) as f64,
                    next(400) as f64,
                    20.0 + next(40) as f64,
                    20.0 + next(40) as f64,
                )
            })
            .collect();

        let mut event = enriched(detections);
        let mut associator = Associator::new(&config(ScoreFormula::Balanced), 30.0);
        run(&mut event, &mut associator, 150);
        associator.flush(&mut event).unwrap();

        let mut seen = HashSet::new();
        for detection in &event.detections {
            assert!(detection.track_id >= 1 && detection.track_id <= associator.issued());
            assert!(
                seen.insert((detection.frame, detection.track_id)),
                "frame {} has track {} twice",
                detection.frame,
                detection.track_id
            );
        }
    }
}
