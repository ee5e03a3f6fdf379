use anyhow::Context;
use clap::Parser;
/// 录像事件目标跟踪
/// Object tracking over recorded events - ffmpeg decode + overlay + frame sink
///
/// 主程序入口 - 直接运行: cargo run --bin object_tracker -- --event event.json
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use object_tracker_rs::{
    frame_channel, gen_time_string, parse_events, Args, ComposedFrame, FfmpegBackend,
    ObjectTracker, RunOutcome, TrackerHandle,
};
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.to_config()?;

    let raw = std::fs::read_to_string(&args.event)
        .with_context(|| format!("failed to read {:?}", args.event))?;
    let events = parse_events(&raw)?;

    info!("🚀 目标跟踪启动");
    info!("📂 录像目录: {}", config.segments_dir());
    info!("📊 评分公式: {:?}", config.score_formula);
    info!("📦 事件数量: {}", events.len());

    let dump_dir = match &args.dump_dir {
        Some(dir) => {
            let dir = dir.join(gen_time_string("-"));
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {:?}", dir))?;
            info!("💾 保存帧到: {:?} (每 {} 帧)", dir, args.dump_every);
            Some(dir)
        }
        None => None,
    };

    let backend = Arc::new(FfmpegBackend::new(&config));
    let (sink, frames) = frame_channel(config.sink_capacity);
    let mut tracker = ObjectTracker::new(config, backend, sink);

    // 消费线程: 取帧 → 可选保存 → 可选截断
    let consumer = Consumer {
        frames,
        handle: tracker.cancel_handle(),
        dump_dir,
        dump_every: args.dump_every.max(1),
        max_frames: args.max_frames,
    };
    let consumer = std::thread::Builder::new()
        .name("frame-consumer".to_string())
        .spawn(move || consumer.run())?;

    let mut failed = 0;
    for event in events {
        let id = event.id;
        match tracker.handle_event(event) {
            RunOutcome::Done { frames } => info!("event.ID: {}; {} frames", id, frames),
            RunOutcome::Cancelled => warn!("event.ID: {}; cancelled", id),
            RunOutcome::Failed(e) => {
                error!("event.ID: {}; {}", id, e);
                failed += 1;
            }
        }
    }

    // 关闭发送端, 消费线程随之退出
    drop(tracker);
    let total = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("frame consumer panicked"))?;

    info!("✅ 处理完成: 共 {} 帧, {} 个事件失败", total, failed);
    Ok(())
}

struct Consumer {
    frames: Receiver<ComposedFrame>,
    handle: TrackerHandle,
    dump_dir: Option<PathBuf>,
    dump_every: u64,
    max_frames: Option<u64>,
}

impl Consumer {
    fn run(self) -> u64 {
        let mut total = 0;
        let mut in_run = 0;

        for composed in self.frames.iter() {
            // 帧号从1开始, 新运行重新计数
            if composed.frame == 1 {
                in_run = 0;
            }
            total += 1;
            in_run += 1;

            if let Some(dir) = &self.dump_dir {
                if in_run % self.dump_every == 0 {
                    self.save(dir, &composed);
                }
            }

            if self.max_frames.is_some_and(|max| in_run == max) {
                info!("⏹️ 已输出 {} 帧, 取消当前事件", in_run);
                self.handle.cancel_run();
            }
        }

        total
    }

    fn save(&self, dir: &std::path::Path, composed: &ComposedFrame) {
        let path = dir.join(format!(
            "{}_{:06}.png",
            composed.timestamp.format("%Y%m%dT%H%M%S%.3f"),
            composed.frame
        ));
        if let Err(e) = composed.image.save(&path) {
            warn!("⚠️ 保存失败 {:?}: {}", path, e);
        }
    }
}
