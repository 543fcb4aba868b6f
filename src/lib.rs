pub mod aggregator;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame_sink;
pub mod frame_source;
pub mod handler;
pub mod message;
pub mod processor;
pub mod queue;
pub mod render;
pub mod report;
pub mod workspace;

pub use aggregator::{detection_event, DetectionAggregator};
pub use config::{ConfigLayer, ConfigLoader, WorkerConfig};
pub use detector::{BoundingBox, Detection, Detector, DetectorConfig, YoloDetector};
pub use error::{DecodeError, EncodeError, InferenceError, JobError, PipelineError, PublishError};
pub use frame_sink::{FfmpegFrameSink, FrameSink};
pub use frame_source::{DecodedVideo, FfmpegFrameSource, Frame, FrameSource};
pub use handler::MessageHandler;
pub use message::{BufferPayload, Job, JobMessage, ResultMessage};
pub use processor::{ProcessOutput, VideoPipeline};
pub use queue::{AmqpPublisher, ResultPublisher};
pub use report::{DetectionEvent, Report};
