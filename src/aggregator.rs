use std::collections::BTreeSet;

use crate::detector::Detection;
use crate::report::{DetectionEvent, Report};

/// 按两位小数取整，与十进制四舍六入五成双的结果一致
///
/// 先按精确十进制值格式化再解析，避免 `(x * 100.0).round()` 在 0.125 这类
/// 恰好落在中点的值上出现偏差。
pub fn round_time(seconds: f64) -> f64 {
    format!("{:.2}", seconds).parse().unwrap_or(seconds)
}

/// 单帧检测结果 → 报告条目，没有检测时返回 None
pub fn detection_event(frame_index: usize, detections: &[Detection], fps: f64) -> Option<DetectionEvent> {
    if detections.is_empty() {
        return None;
    }
    let objects: BTreeSet<&str> = detections.iter().map(|d| d.label.as_str()).collect();
    Some(DetectionEvent {
        time: round_time(frame_index as f64 / fps),
        objects: objects.into_iter().map(str::to_string).collect(),
    })
}

/// 逐帧累积检测事件，帧之间互不合并
#[derive(Debug, Default)]
pub struct DetectionAggregator {
    events: Vec<DetectionEvent>,
}

impl DetectionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        frame_index: usize,
        detections: &[Detection],
        fps: f64,
    ) -> Option<&DetectionEvent> {
        let event = detection_event(frame_index, detections, fps)?;
        self.events.push(event);
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_report(self) -> Report {
        Report {
            detections: self.events,
        }
    }
}
