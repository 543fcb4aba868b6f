use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// 二进制数据的线上表示：`{"type": "Buffer", "data": [0-255, ...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferPayload {
    #[serde(rename = "type", default = "BufferPayload::default_kind")]
    pub kind: String,

    pub data: Vec<u8>,
}

impl BufferPayload {
    fn default_kind() -> String {
        "Buffer".to_string()
    }

    pub fn new(data: Vec<u8>) -> Self {
        Self {
            kind: Self::default_kind(),
            data,
        }
    }
}

/// 输入队列上的原始任务消息
#[derive(Debug, Clone, Deserialize)]
pub struct JobMessage {
    /// 视频 ID
    #[serde(rename = "videoId", default)]
    pub video_id: Option<String>,

    /// 视频数据
    #[serde(rename = "videoData", default)]
    pub video_data: Option<BufferPayload>,
}

/// 校验通过的任务
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub video_id: String,
    pub video_data: Vec<u8>,
}

impl Job {
    /// 解析并校验原始消息，缺少或为空的字段都视为格式错误
    pub fn parse(raw: &[u8]) -> Result<Self, JobError> {
        let message: JobMessage = serde_json::from_slice(raw)
            .map_err(|e| JobError::MalformedJob(format!("JSON 解析失败: {}", e)))?;
        Self::try_from(message)
    }
}

impl TryFrom<JobMessage> for Job {
    type Error = JobError;

    fn try_from(message: JobMessage) -> Result<Self, Self::Error> {
        let video_id = message
            .video_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| JobError::MalformedJob("缺少 videoId".to_string()))?;
        let video_data = message
            .video_data
            .map(|payload| payload.data)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| JobError::MalformedJob(format!("视频 {} 缺少 videoData", video_id)))?;
        Ok(Self { video_id, video_data })
    }
}

/// 输出队列上的结果消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// 与任务相同的视频 ID
    #[serde(rename = "videoId")]
    pub video_id: String,

    /// 标注后的视频
    #[serde(rename = "processedVideo")]
    pub processed_video: BufferPayload,

    /// JSON 编码的检测报告
    #[serde(rename = "report")]
    pub report: String,
}

impl ResultMessage {
    pub fn new(video_id: String, processed_video: Vec<u8>, report: String) -> Self {
        Self {
            video_id,
            processed_video: BufferPayload::new(processed_video),
            report,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, JobError> {
        serde_json::to_vec(self).map_err(JobError::Serialize)
    }
}
