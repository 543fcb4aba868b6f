use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::error::JobError;
use crate::message::{Job, ResultMessage};
use crate::processor::VideoPipeline;
use crate::queue::ResultPublisher;

/// 输入消息处理器
///
/// 每条消息独立处理：解析、校验、跑流水线、投递结果。任何失败都只记录日志
/// 并丢弃该消息，不会向上传播到消费循环。
pub struct MessageHandler<P> {
    pipeline: Arc<VideoPipeline>,
    publisher: P,
}

impl<P: ResultPublisher> MessageHandler<P> {
    pub fn new(pipeline: Arc<VideoPipeline>, publisher: P) -> Self {
        Self {
            pipeline,
            publisher,
        }
    }

    /// 处理一条原始消息，成功时投递结果，失败时记录并丢弃
    pub async fn handle(&self, raw: &[u8]) {
        match self.process(raw).await {
            Ok(video_id) => info!("[✓] 视频 {} 的处理结果已发送到输出队列", video_id),
            Err(JobError::MalformedJob(reason)) => {
                warn!("⚠️  [消息处理] 消息数据不正确，已丢弃: {}", reason)
            }
            Err(e) => error!("❌ [消息处理] {}", e),
        }
    }

    /// 处理一条消息，返回已投递结果的视频 ID
    pub async fn process(&self, raw: &[u8]) -> Result<String, JobError> {
        let Job {
            video_id,
            video_data,
        } = Job::parse(raw)?;

        let span = info_span!("job", video_id = %video_id);
        async {
            info!("[x] 开始处理视频 {} ({} 字节)", video_id, video_data.len());

            let pipeline = Arc::clone(&self.pipeline);
            let blocking_span = Span::current();
            let output = tokio::task::spawn_blocking(move || {
                blocking_span.in_scope(|| pipeline.process(&video_data))
            })
            .await
            .map_err(|e| JobError::Worker(e.to_string()))?
            .map_err(|source| JobError::Pipeline {
                video_id: video_id.clone(),
                source,
            })?;

            let payload = ResultMessage::new(
                video_id.clone(),
                output.annotated_video,
                output.report_json,
            )
            .to_bytes()?;

            self.publisher
                .publish(&payload)
                .await
                .map_err(|source| JobError::Publish {
                    video_id: video_id.clone(),
                    source,
                })?;

            Ok::<_, JobError>(video_id)
        }
        .instrument(span)
        .await
    }
}
