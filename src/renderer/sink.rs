/// 帧输出: 有界阻塞通道
/// Bounded frame hand-off to the consumer
///
/// 队列满时阻塞生产者 (背压, 不丢帧); 取消令牌可随时打断阻塞中的发送.
use crossbeam_channel::{bounded, select, Receiver, Sender};

use super::overlay::ComposedFrame;
use crate::pipeline::cancel::CancellationToken;

/// 发送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// 运行被取消, 帧已丢弃
    Cancelled,
    /// 消费端已关闭
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: Sender<ComposedFrame>,
}

/// 创建容量为 `capacity` 的帧通道 (至少为1)
pub fn frame_channel(capacity: usize) -> (FrameSink, Receiver<ComposedFrame>) {
    let (tx, rx) = bounded(capacity.max(1));
    (FrameSink { tx }, rx)
}

impl FrameSink {
    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }

    /// 阻塞发送, 直到送达、被取消或消费端关闭
    pub fn send(&self, frame: ComposedFrame, cancel: &CancellationToken) -> Delivery {
        if cancel.is_cancelled() {
            return Delivery::Cancelled;
        }

        select! {
            send(self.tx, frame) -> res => match res {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Disconnected,
            },
            recv(cancel.signal()) -> _ => Delivery::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbaImage;
    use std::time::{Duration, Instant};

    fn frame(n: i64) -> ComposedFrame {
        ComposedFrame {
            frame: n,
            timestamp: Utc::now(),
            image: RgbaImage::new(2, 2),
        }
    }

    #[test]
    fn test_frames_delivered_in_order() {
        let (sink, rx) = frame_channel(4);
        let cancel = CancellationToken::new();
        for n in 1..=3 {
            assert_eq!(sink.send(frame(n), &cancel), Delivery::Sent);
        }
        let received: Vec<i64> = rx.try_iter().map(|f| f.frame).collect();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_unblocks_full_sink() {
        let (sink, _rx) = frame_channel(1);
        let cancel = CancellationToken::new();
        assert_eq!(sink.send(frame(1), &cancel), Delivery::Sent);

        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = Instant::now();
        assert_eq!(sink.send(frame(2), &cancel), Delivery::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_dropped_consumer() {
        let (sink, rx) = frame_channel(1);
        drop(rx);
        assert_eq!(
            sink.send(frame(1), &CancellationToken::new()),
            Delivery::Disconnected
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (sink, _rx) = frame_channel(0);
        assert_eq!(sink.capacity(), Some(1));
    }
}
