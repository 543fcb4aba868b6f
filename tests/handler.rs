mod common;

use common::{pipeline, FakeDetector, FakeSource, RecordingPublisher};
use serde_json::{json, Value};
use std::sync::Arc;
use video_annotate::{JobError, MessageHandler, PipelineError, Report};

fn job(video_id: &str, data: &[u8]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "videoId": video_id,
        "videoData": { "type": "Buffer", "data": data },
    }))
    .unwrap()
}

fn handler(detector: FakeDetector, publisher: RecordingPublisher) -> MessageHandler<RecordingPublisher> {
    let pipeline = Arc::new(pipeline(FakeSource::new(2, 1.0), detector));
    MessageHandler::new(pipeline, publisher)
}

#[tokio::test]
async fn valid_job_publishes_result_with_same_video_id() {
    let publisher = RecordingPublisher::default();
    let handler = handler(FakeDetector::scripted(vec![vec!["car"]]), publisher.clone());

    handler.handle(&job("abc", &[1, 2, 3])).await;

    let messages = publisher.messages();
    assert_eq!(messages.len(), 1);
    let result: Value = serde_json::from_slice(&messages[0]).unwrap();
    assert_eq!(result["videoId"], "abc");
    assert_eq!(result["processedVideo"]["type"], "Buffer");
    assert!(!result["processedVideo"]["data"].as_array().unwrap().is_empty());

    let report = Report::from_json(result["report"].as_str().unwrap()).unwrap();
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.detections[0].time, 0.0);
    assert_eq!(report.detections[0].objects, vec!["car".to_string()]);
}

#[tokio::test]
async fn malformed_job_is_dropped_without_publishing() {
    let publisher = RecordingPublisher::default();
    let handler = handler(FakeDetector::default(), publisher.clone());

    handler.handle(&job("", &[1, 2, 3])).await;
    handler.handle(br#"{"videoId":"abc"}"#).await;
    handler.handle(&job("abc", &[])).await;
    handler.handle(b"not json").await;

    assert!(publisher.messages().is_empty());
    assert!(matches!(
        handler.process(&job("", &[1, 2, 3])).await,
        Err(JobError::MalformedJob(_))
    ));
}

#[tokio::test]
async fn pipeline_failure_publishes_nothing() {
    let publisher = RecordingPublisher::default();
    let handler = handler(FakeDetector::failing_at(1), publisher.clone());

    let err = handler.process(&job("abc", &[1])).await.unwrap_err();
    match err {
        JobError::Pipeline { video_id, source } => {
            assert_eq!(video_id, "abc");
            assert!(matches!(source, PipelineError::Inference { frame_index: 1, .. }));
        }
        other => panic!("unexpected error: {}", other),
    }

    handler.handle(&job("abc", &[1])).await;
    assert!(publisher.messages().is_empty());
}

#[tokio::test]
async fn publish_failure_is_reported_not_raised() {
    let handler = handler(FakeDetector::default(), RecordingPublisher::failing());

    let err = handler.process(&job("abc", &[1])).await.unwrap_err();
    assert!(matches!(err, JobError::Publish { ref video_id, .. } if video_id == "abc"));

    // handle 只记录日志
    handler.handle(&job("abc", &[1])).await;
}

#[tokio::test]
async fn jobs_are_independent() {
    let publisher = RecordingPublisher::default();
    let handler = handler(FakeDetector::scripted(vec![vec!["dog"]]), publisher.clone());

    handler.handle(&job("", &[1])).await;
    handler.handle(&job("first", &[1])).await;
    handler.handle(b"{}").await;
    handler.handle(&job("second", &[2])).await;

    let ids: Vec<String> = publisher
        .messages()
        .iter()
        .map(|m| serde_json::from_slice::<Value>(m).unwrap()["videoId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
}
