use serde::{Deserialize, Serialize};

/// 某一帧的检测汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// 时间戳（秒），保留两位小数
    pub time: f64,
    /// 该帧出现的类别（去重）
    pub objects: Vec<String>,
}

/// 整个视频的检测报告，按帧顺序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub detections: Vec<DetectionEvent>,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_layout_matches_the_wire_format() {
        let report = Report {
            detections: vec![DetectionEvent {
                time: 0.0,
                objects: vec!["car".to_string()],
            }],
        };
        assert_eq!(
            report.to_json().unwrap(),
            r#"{"detections":[{"time":0.0,"objects":["car"]}]}"#
        );
        assert_eq!(Report::default().to_json().unwrap(), r#"{"detections":[]}"#);
    }

    #[test]
    fn round_trip_preserves_order_times_and_labels() {
        let report = Report {
            detections: vec![
                DetectionEvent {
                    time: 0.33,
                    objects: vec!["gun".to_string(), "knife".to_string()],
                },
                DetectionEvent {
                    time: 0.12,
                    objects: vec!["car".to_string()],
                },
                DetectionEvent {
                    time: 12.5,
                    objects: vec!["person".to_string()],
                },
            ],
        };
        let parsed = Report::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
    }
}
