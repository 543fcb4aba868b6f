use thiserror::Error;

/// 输入视频无法解码
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("视频数据为空")]
    Empty,
    #[error("写入临时视频文件失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("FFmpeg 解码失败: {context}: {source}")]
    Ffmpeg {
        context: &'static str,
        #[source]
        source: ffmpeg_next::Error,
    },
    #[error("未找到视频流")]
    NoVideoStream,
    #[error("无效的帧率: {0}")]
    InvalidFrameRate(f64),
    #[error("解码帧数据异常: {0}")]
    BadFrame(String),
}

impl DecodeError {
    pub(crate) fn ffmpeg(context: &'static str) -> impl FnOnce(ffmpeg_next::Error) -> Self {
        move |source| DecodeError::Ffmpeg { context, source }
    }
}

/// 检测模型无法处理某一帧
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("帧尺寸非法: {width}x{height}")]
    MalformedFrame { width: u32, height: u32 },
    #[error("模型推理失败: {0}")]
    Runtime(#[from] ort::Error),
    #[error("模型输出形状不符合预期: {0}")]
    UnexpectedOutput(String),
    #[error("推理会话锁已损坏")]
    Poisoned,
}

/// 标注帧无法重新编码
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("没有可编码的帧")]
    NoFrames,
    #[error("帧尺寸不一致: 第 {index} 帧为 {actual:?}，期望 {expected:?}")]
    InconsistentDimensions {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("无效的帧率: {0}")]
    InvalidFrameRate(f64),
    #[error("调用 ffmpeg 失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg 编码失败 ({status}): {stderr}")]
    Ffmpeg { status: String, stderr: String },
}

/// 结果无法投递到输出队列
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("AMQP 错误: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("消息被 broker 拒绝")]
    Rejected,
    #[error("{0}")]
    Other(String),
}

/// 单个视频处理流水线的失败
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("第 {frame_index} 帧推理失败: {source}")]
    Inference {
        frame_index: usize,
        #[source]
        source: InferenceError,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("序列化检测报告失败: {0}")]
    Report(#[source] serde_json::Error),
}

/// 单条消息处理失败，由 Message Handler 统一记录并丢弃
#[derive(Debug, Error)]
pub enum JobError {
    #[error("消息格式错误: {0}")]
    MalformedJob(String),
    #[error("视频 {video_id} 处理失败: {source}")]
    Pipeline {
        video_id: String,
        #[source]
        source: PipelineError,
    },
    #[error("视频 {video_id} 结果投递失败: {source}")]
    Publish {
        video_id: String,
        #[source]
        source: PublishError,
    },
    #[error("序列化结果消息失败: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("处理任务异常退出: {0}")]
    Worker(String),
}
