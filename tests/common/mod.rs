#![allow(dead_code)]

use async_trait::async_trait;
use image::Rgb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use video_annotate::frame_sink::validate_frames;
use video_annotate::{
    BoundingBox, DecodeError, DecodedVideo, Detection, Detector, EncodeError, Frame, FrameSink,
    FrameSource, InferenceError, PublishError, ResultPublisher, VideoPipeline,
};

/// 生成 N 帧纯色画面，第 i 帧的红色通道等于 i，便于追踪帧序
pub struct FakeSource {
    pub frame_count: usize,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl FakeSource {
    pub fn new(frame_count: usize, fps: f64) -> Self {
        Self {
            frame_count,
            fps,
            width: 8,
            height: 6,
        }
    }
}

impl FrameSource for FakeSource {
    fn open(&self, video: &[u8]) -> Result<DecodedVideo, DecodeError> {
        if video.is_empty() {
            return Err(DecodeError::Empty);
        }
        let (width, height) = (self.width, self.height);
        let frames = (0..self.frame_count)
            .map(move |i| Ok(Frame::from_pixel(width, height, Rgb([i as u8, 0, 0]))));
        Ok(DecodedVideo {
            fps: self.fps,
            width,
            height,
            frames: Box::new(frames),
        })
    }
}

/// 按帧号返回预设标签，可以指定在某一帧失败
#[derive(Default)]
pub struct FakeDetector {
    pub script: Vec<Vec<&'static str>>,
    pub fail_at: Option<usize>,
}

impl FakeDetector {
    pub fn scripted(script: Vec<Vec<&'static str>>) -> Self {
        Self {
            script,
            fail_at: None,
        }
    }

    pub fn failing_at(frame_index: usize) -> Self {
        Self {
            script: Vec::new(),
            fail_at: Some(frame_index),
        }
    }
}

impl Detector for FakeDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let index = frame.get_pixel(0, 0)[0] as usize;
        if self.fail_at == Some(index) {
            return Err(InferenceError::UnexpectedOutput(format!("scripted failure at {}", index)));
        }
        let labels = self.script.get(index).cloned().unwrap_or_default();
        Ok(labels
            .into_iter()
            .enumerate()
            .map(|(class_id, label)| Detection {
                class_id,
                label: label.to_string(),
                confidence: 0.9,
                bbox: BoundingBox::new(1.0, 1.0, 4.0, 4.0),
            })
            .collect())
    }

    /// 有检测结果的帧把绿色通道涂满
    fn render(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut out = frame.clone();
        if !detections.is_empty() {
            for pixel in out.pixels_mut() {
                pixel[1] = 255;
            }
        }
        out
    }
}

/// 每帧输出两个字节：帧号（红色通道）与是否被标注（绿色通道）
pub struct FakeSink;

impl FrameSink for FakeSink {
    fn encode(&self, frames: &[Frame], fps: f64) -> Result<Vec<u8>, EncodeError> {
        validate_frames(frames, fps)?;
        Ok(frames
            .iter()
            .flat_map(|f| {
                let p = f.get_pixel(0, 0);
                [p[0], p[1]]
            })
            .collect())
    }
}

/// 记录所有投递内容，可设置为投递失败
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub published: Arc<Mutex<Vec<Vec<u8>>>>,
    pub fail: Arc<AtomicBool>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.fail.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Other("broker unavailable".to_string()));
        }
        self.published.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

pub fn pipeline(source: FakeSource, detector: FakeDetector) -> VideoPipeline {
    VideoPipeline::new(Box::new(source), Arc::new(detector), Box::new(FakeSink))
}
