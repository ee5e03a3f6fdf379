/// 跟踪错误类型
/// Tracker error taxonomy
///
/// 所有错误都在编排器边界被捕获: 单个事件失败只会记录日志并丢弃该事件.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// 事件数据不合法 (时间范围为空等)
    #[error("input error: {0}")]
    Input(String),

    /// 视频文件不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 路径存在但不是文件
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 在未完成富化的事件上执行跟踪
    #[error("event {0} hasn't been enriched yet; cannot track")]
    NotEnriched(i64),

    /// ffprobe 执行失败或输出无法解析
    #[error("probe error: {0}")]
    Probe(String),

    /// 解码管道短读、解码进程失败
    #[error("stream error: {0}")]
    Stream(String),

    /// 几何点数错误
    #[error("geometry error: {0}")]
    Geometry(String),

    /// 坐标不是合法浮点数
    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
