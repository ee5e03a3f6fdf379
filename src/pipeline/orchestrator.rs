//! 跟踪编排器 (Tracker Orchestrator)
//! 职责: PartialEvent → 富化 → 逐帧 (关联 → 叠加 → 输出) → 回到空闲
//!
//! 状态机: Idle → Enriching → Streaming → Done / Failed → Idle
//! 单个事件失败只记录日志并丢弃, 不影响后续事件.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{error, info, warn};

use super::cancel::CancellationToken;
use crate::config::TrackerConfig;
use crate::detection::enricher;
use crate::detection::tracker::Associator;
use crate::detection::types::{EnrichedEvent, PartialEvent};
use crate::error::{Result, TrackerError};
use crate::input::VideoBackend;
use crate::renderer::{Delivery, FrameSink, OverlayRenderer};

/// 编排器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Enriching,
    Streaming,
    Done,
    Failed,
}

/// 单次运行结果
#[derive(Debug)]
pub enum RunOutcome {
    /// 流正常结束, 已输出 `frames` 帧
    Done { frames: u64 },
    Failed(TrackerError),
    Cancelled,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, RunOutcome::Done { .. })
    }
}

/// 取消句柄, 可跨线程持有
///
/// `cancel_run` 只结束当前运行; `close` 结束当前及之后所有运行.
#[derive(Debug, Clone, Default)]
pub struct TrackerHandle {
    shutdown: CancellationToken,
    current: Arc<Mutex<CancellationToken>>,
}

impl TrackerHandle {
    pub fn cancel_run(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    pub fn close(&self) {
        self.shutdown.cancel();
        self.cancel_run();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 为新运行安装令牌; 先安装再检查关闭标志, 不会漏掉并发的 `close`
    fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        if self.is_closed() {
            token.cancel();
        }
        token
    }
}

pub struct ObjectTracker {
    config: TrackerConfig,
    backend: Arc<dyn VideoBackend>,
    sink: FrameSink,
    renderer: OverlayRenderer,
    handle: TrackerHandle,
    state: RunState,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig, backend: Arc<dyn VideoBackend>, sink: FrameSink) -> Self {
        let renderer = OverlayRenderer::new(&config);
        Self {
            config,
            backend,
            sink,
            renderer,
            handle: TrackerHandle::default(),
            state: RunState::Idle,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn cancel_handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// 取消进行中的运行, 之后的事件立即以 `Cancelled` 结束
    pub fn close(&self) {
        info!("🛑 object tracker closing");
        self.handle.close();
    }

    /// 处理一个事件, 结束后总是回到 `Idle`
    pub fn handle_event(&mut self, event: PartialEvent) -> RunOutcome {
        let cancel = self.handle.begin_run();
        if cancel.is_cancelled() {
            info!("event.ID: {}; tracker closed, skipping", event.id);
            return RunOutcome::Cancelled;
        }

        let started = Instant::now();

        self.state = RunState::Enriching;
        let mut enriched = match self.enrich_event(&event) {
            Ok(enriched) => enriched,
            Err(e) => return self.fail(event.id, "enrich", e),
        };

        self.state = RunState::Streaming;
        let outcome = match self.track_event(&mut enriched, &cancel) {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(event.id, "track", e),
        };

        match &outcome {
            RunOutcome::Done { frames } => {
                self.state = RunState::Done;
                let elapsed = started.elapsed().as_secs_f64();
                info!(
                    "✅ event.ID: {}; done: {} frames in {:.2}s ({:.1} FPS)",
                    event.id,
                    frames,
                    elapsed,
                    *frames as f64 / elapsed.max(f64::EPSILON)
                );
            }
            _ => info!("event.ID: {}; cancelled", event.id),
        }

        self.state = RunState::Idle;
        outcome
    }

    fn fail(&mut self, event_id: i64, stage: &str, e: TrackerError) -> RunOutcome {
        self.state = RunState::Failed;
        error!("❌ event.ID: {}; failed to {}: {}", event_id, stage, e);
        self.state = RunState::Idle;
        RunOutcome::Failed(e)
    }

    /// 富化事件 (探测视频并建立索引)
    pub fn enrich_event(&self, event: &PartialEvent) -> Result<EnrichedEvent> {
        enricher::enrich_event(event, &self.config, self.backend.as_ref())
    }

    /// 逐帧关联、叠加并输出, 直到流结束或被取消
    ///
    /// 返回 `Done` 或 `Cancelled`; 读流/关联/渲染错误以 `Err` 返回, 帧源随之释放.
    pub fn track_event(
        &self,
        event: &mut EnrichedEvent,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if !event.video.is_enriched() {
            return Err(TrackerError::NotEnriched(event.id));
        }

        let mut associator = Associator::new(&self.config, event.video.fps);
        let mut source = self.backend.open(&event.video, cancel)?;

        info!(
            "event.ID: {}; streaming {:?} (lookback {} frames)...",
            event.id,
            event.video.path,
            associator.lookback_frames()
        );

        let mut frames: u64 = 0;

        while let Some(raw) = source.next_frame()? {
            associator.associate_frame(event, raw.number)?;
            let composed = self.renderer.compose(&raw.data, raw.number, event)?;

            match self.sink.send(composed, cancel) {
                Delivery::Sent => frames += 1,
                Delivery::Cancelled => return Ok(RunOutcome::Cancelled),
                Delivery::Disconnected => {
                    warn!(
                        "⚠️ event.ID: {}; frame consumer went away after {} frames",
                        event.id, frames
                    );
                    return Ok(RunOutcome::Cancelled);
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let flushed = associator.flush(event)?;
        if flushed > 0 {
            info!(
                "event.ID: {}; associated {} detections beyond the decoded stream",
                event.id, flushed
            );
        }

        info!(
            "event.ID: {}; {} tracks over {} detections",
            event.id,
            associator.issued(),
            event.detections.len()
        );

        Ok(RunOutcome::Done { frames })
    }
}
