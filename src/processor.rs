use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::aggregator::DetectionAggregator;
use crate::config::WorkerConfig;
use crate::detector::{Detector, YoloDetector};
use crate::error::PipelineError;
use crate::frame_sink::{FfmpegFrameSink, FrameSink};
use crate::frame_source::{DecodedVideo, FfmpegFrameSource, Frame, FrameSource};
use crate::report::Report;

/// 单个视频的处理结果
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 标注后的视频（H.264 MP4）
    pub annotated_video: Vec<u8>,
    /// JSON 编码的检测报告
    pub report_json: String,
    pub report: Report,
    pub fps: f64,
    pub frame_count: usize,
}

/// 视频处理流水线：解码 → 逐帧检测与绘制 → 汇总报告 → 重新编码
///
/// 一次调用要么返回完整结果，要么返回错误，不会产生部分结果。
pub struct VideoPipeline {
    source: Box<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    sink: Box<dyn FrameSink>,
}

impl VideoPipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            source,
            detector,
            sink,
        }
    }

    /// 按配置组装 FFmpeg 解码、YOLO 检测与 H.264 编码
    ///
    /// 模型在这里加载一次，之后所有任务共享。
    pub fn from_config(config: &WorkerConfig) -> anyhow::Result<Self> {
        let detector = YoloDetector::load(&config.detector_config()?)?;
        let source = FfmpegFrameSource::new(&config.work_dir)?;
        let sink = FfmpegFrameSink::new(config.ffmpeg_bin.clone(), &config.work_dir);
        Ok(Self::new(Box::new(source), Arc::new(detector), Box::new(sink)))
    }

    /// 处理编码后的视频字节
    pub fn process(&self, video: &[u8]) -> Result<ProcessOutput, PipelineError> {
        let decode_start = Instant::now();
        let decoded = self.source.open(video)?;
        debug!(
            "[视频处理] 打开视频完成，耗时: {:.2}秒",
            decode_start.elapsed().as_secs_f64()
        );
        self.process_decoded(decoded)
    }

    fn process_decoded(&self, decoded: DecodedVideo) -> Result<ProcessOutput, PipelineError> {
        let total_start = Instant::now();
        let DecodedVideo {
            fps,
            width,
            height,
            frames,
        } = decoded;
        info!("  • 分辨率: {}x{}", width, height);
        info!("  • 帧率: {:.2} fps", fps);

        // 1. 逐帧检测并绘制
        let detect_start = Instant::now();
        let mut annotated: Vec<Frame> = Vec::new();
        let mut aggregator = DetectionAggregator::new();

        for (frame_index, frame) in frames.enumerate() {
            let frame = frame?;
            let detections = self
                .detector
                .detect(&frame)
                .map_err(|source| PipelineError::Inference {
                    frame_index,
                    source,
                })?;
            annotated.push(self.detector.render(&frame, &detections));
            if let Some(event) = aggregator.observe(frame_index, &detections, fps) {
                debug!("[视频处理] 第 {} 帧 ({:.2}s): {:?}", frame_index, event.time, event.objects);
            }
        }
        let detect_duration = detect_start.elapsed();
        let frame_count = annotated.len();
        let avg_frame_time = if frame_count > 0 {
            detect_duration.as_millis() as f64 / frame_count as f64
        } else {
            0.0
        };
        info!(
            "✅ [视频处理] 检测完成，耗时: {:.2}秒",
            detect_duration.as_secs_f64()
        );
        info!("  • 处理帧数: {} 帧", frame_count);
        info!("  • 有检测结果的帧: {} 帧", aggregator.len());
        info!("  • 平均每帧耗时: {:.2}ms", avg_frame_time);

        // 2. 重新编码
        let encode_start = Instant::now();
        let annotated_video = self.sink.encode(&annotated, fps)?;
        info!(
            "✅ [视频处理] 编码完成，耗时: {:.2}秒 ({} 字节)",
            encode_start.elapsed().as_secs_f64(),
            annotated_video.len()
        );

        // 3. 生成报告
        let report = aggregator.into_report();
        let report_json = report.to_json().map_err(PipelineError::Report)?;

        info!(
            "🎉 [视频处理] 处理完成！总耗时: {:.2}秒",
            total_start.elapsed().as_secs_f64()
        );

        Ok(ProcessOutput {
            annotated_video,
            report_json,
            report,
            fps,
            frame_count,
        })
    }
}
