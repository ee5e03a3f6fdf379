/// 帧源: FFmpeg 子进程解码 → 定长 RGB24 帧
/// Frame source over an external decode pipe
///
/// 两线程架构:
/// 1. 读取线程: 从管道读满 `width*height*3` 字节 → 有界通道
/// 2. 调用线程: `next_frame()` 依次取帧, 第N个缓冲即第N帧
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, info, warn};

use crate::detection::types::Video;
use crate::error::{Result, TrackerError};
use crate::pipeline::cancel::CancellationToken;

/// 已解码帧 (RGB24)
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// 1-based
    pub number: i64,
    pub data: Vec<u8>,
}

/// 读取线程 → 调用线程
enum Chunk {
    Frame(Vec<u8>),
    End,
    Failed(TrackerError),
    Cancelled,
}

/// 解码子进程及其 stderr 收集线程
struct DecodeProcess {
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

pub struct FrameSource {
    frame_size: usize,
    frames: Option<Receiver<Chunk>>,
    pending: Option<Chunk>,
    reader: Option<JoinHandle<()>>,
    process: Option<DecodeProcess>,
    cancel: CancellationToken,
    frame: i64,
    finished: bool,
}

impl FrameSource {
    /// 在任意字节流上建立帧源
    pub fn from_reader<R>(
        reader: R,
        frame_size: usize,
        queue_frames: usize,
        cancel: CancellationToken,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded::<Chunk>(queue_frames.max(1));

        let reader = std::thread::Builder::new()
            .name("frame-reader".to_string())
            .spawn(move || read_frames(reader, frame_size, tx))?;

        Ok(Self {
            frame_size,
            frames: Some(rx),
            pending: None,
            reader: Some(reader),
            process: None,
            cancel,
            frame: 0,
            finished: false,
        })
    }

    /// 启动 ffmpeg 解码 `video.path` 为原始 RGB24
    pub fn spawn_ffmpeg(
        ffmpeg_bin: &str,
        video: &Video,
        queue_frames: usize,
        startup_grace: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut child = Command::new(ffmpeg_bin)
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(&video.path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TrackerError::Stream(format!("failed to start {} for {:?}: {}", ffmpeg_bin, video.path, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrackerError::Stream("ffmpeg stdout unavailable".to_string()))?;

        let stderr = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut collected = String::new();
                let _ = stderr.read_to_string(&mut collected);
                collected
            })
        });

        let process = DecodeProcess { child, stderr };

        let mut source = match Self::from_reader(stdout, video.frame_size(), queue_frames, cancel) {
            Ok(source) => source,
            Err(e) => {
                let mut process = process;
                let _ = process.child.kill();
                let _ = process.child.wait();
                return Err(e);
            }
        };
        source.process = Some(process);

        info!("🎬 解码进程启动: {:?}", video.path);
        source.wait_for_startup(startup_grace)?;

        Ok(source)
    }

    /// 宽限期内等待首个输出; 超时视为启动较慢, 继续读取
    fn wait_for_startup(&mut self, grace: Duration) -> Result<()> {
        let Some(frames) = &self.frames else {
            return Ok(());
        };

        let first = select! {
            recv(frames) -> chunk => chunk.unwrap_or(Chunk::End),
            recv(self.cancel.signal()) -> _ => Chunk::Cancelled,
            default(grace) => {
                debug!("no decoder output after {:?}; continuing to read", grace);
                return Ok(());
            }
        };

        match first {
            Chunk::Failed(e) => {
                self.close();
                Err(TrackerError::Stream(format!("failed to open decode stream: {}", e)))
            }
            Chunk::End => {
                // 没有任何输出就退出: 检查进程状态
                self.finished = true;
                self.check_exit()
                    .map_err(|e| TrackerError::Stream(format!("failed to open decode stream: {}", e)))
            }
            chunk => {
                self.pending = Some(chunk);
                Ok(())
            }
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// 解码子进程 pid; 非子进程帧源或已关闭时为 `None`
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().map(|process| process.child.id())
    }

    /// 下一帧; 流结束或被取消时返回 `None`
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.finished {
            return Ok(None);
        }

        let chunk = match self.pending.take() {
            Some(chunk) => chunk,
            None => self.receive(),
        };

        match chunk {
            Chunk::Frame(data) => {
                self.frame += 1;
                Ok(Some(RawFrame {
                    number: self.frame,
                    data,
                }))
            }
            Chunk::End => {
                self.finished = true;
                self.check_exit()?;
                Ok(None)
            }
            Chunk::Failed(e) => {
                self.finished = true;
                Err(e)
            }
            Chunk::Cancelled => {
                self.finished = true;
                self.close();
                Ok(None)
            }
        }
    }

    fn receive(&self) -> Chunk {
        let Some(frames) = &self.frames else {
            return Chunk::End;
        };

        if self.cancel.is_cancelled() {
            return Chunk::Cancelled;
        }

        select! {
            recv(frames) -> chunk => chunk.unwrap_or(Chunk::End),
            recv(self.cancel.signal()) -> _ => Chunk::Cancelled,
        }
    }

    /// 流结束后检查解码进程退出码
    fn check_exit(&mut self) -> Result<()> {
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };

        let status = process.child.wait()?;
        let stderr = process
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
        Err(TrackerError::Stream(format!(
            "decoder exited with {} after {} frames: {}",
            status, self.frame, tail
        )))
    }

    /// 结束进程, 关闭管道, 回收线程
    pub fn close(&mut self) {
        self.finished = true;

        if let Some(process) = self.process.as_mut() {
            if let Err(e) = process.child.kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    warn!("⚠️ failed to kill decoder: {}", e);
                }
            }
        }

        // 先丢弃接收端, 阻塞在发送上的读取线程随即退出
        self.pending.take();
        self.frames.take();

        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }

        if let Some(mut process) = self.process.take() {
            let _ = process.child.wait();
            if let Some(stderr) = process.stderr.take() {
                let _ = stderr.join();
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// 读取线程主循环
fn read_frames<R: Read>(mut reader: R, frame_size: usize, tx: Sender<Chunk>) {
    loop {
        let mut buf = vec![0u8; frame_size];

        let chunk = match fill_frame(&mut reader, &mut buf) {
            Ok(0) => Chunk::End,
            Ok(n) if n == frame_size => Chunk::Frame(buf),
            Ok(n) => Chunk::Failed(TrackerError::Stream(format!(
                "short read: got {} of {} bytes",
                n, frame_size
            ))),
            Err((n, e)) => Chunk::Failed(TrackerError::Stream(format!(
                "failed to read after {} bytes: {}",
                n, e
            ))),
        };

        let last = !matches!(chunk, Chunk::Frame(_));
        if tx.send(chunk).is_err() || last {
            break;
        }
    }
}

/// 读满缓冲或遇到 EOF, 返回已读字节数
fn fill_frame<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::result::Result<usize, (usize, std::io::Error)> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err((filled, e)),
        }
    }

    Ok(filled)
}
