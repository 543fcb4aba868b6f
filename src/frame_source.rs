use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::debug;

use crate::error::DecodeError;
use crate::workspace::JobWorkspace;

/// 一帧解码后的 RGB 图像 (高 × 宽 × 3)
pub type Frame = RgbImage;

/// 已打开的视频：帧率、分辨率与按时间顺序的惰性帧序列
pub struct DecodedVideo {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frames: Box<dyn Iterator<Item = Result<Frame, DecodeError>>>,
}

/// 帧来源：把编码后的视频字节解码为帧序列
pub trait FrameSource: Send + Sync {
    fn open(&self, video: &[u8]) -> Result<DecodedVideo, DecodeError>;
}

static FFMPEG_INIT: Once = Once::new();

pub(crate) fn init_ffmpeg() -> Result<(), ffmpeg::Error> {
    let mut result = Ok(());
    FFMPEG_INIT.call_once(|| {
        result = ffmpeg::init();
        // 只输出错误级别日志，抑制 FFmpeg 的警告和信息
        unsafe {
            ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
        }
    });
    result
}

/// 基于 FFmpeg 的帧来源
///
/// 输入字节先写入任务独占的临时目录，再按顺序单遍解码。
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    work_dir: PathBuf,
}

impl FfmpegFrameSource {
    pub fn new(work_dir: impl AsRef<Path>) -> Result<Self, DecodeError> {
        init_ffmpeg().map_err(DecodeError::ffmpeg("初始化 FFmpeg 失败"))?;
        Ok(Self {
            work_dir: work_dir.as_ref().to_path_buf(),
        })
    }
}

impl FrameSource for FfmpegFrameSource {
    fn open(&self, video: &[u8]) -> Result<DecodedVideo, DecodeError> {
        if video.is_empty() {
            return Err(DecodeError::Empty);
        }
        let workspace = JobWorkspace::create(&self.work_dir)?;
        let input_path = workspace.file("input.mp4");
        std::fs::write(&input_path, video)?;
        let frames = FfmpegFrames::open(&input_path, workspace)?;
        Ok(frames.into_decoded())
    }
}

/// 顺序解码迭代器，持有输入上下文、解码器与缩放器
struct FfmpegFrames {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    fps: f64,
    eof_sent: bool,
    finished: bool,
    // 临时输入文件在迭代结束（被 drop）时才删除
    _workspace: JobWorkspace,
}

impl FfmpegFrames {
    fn open(path: &Path, workspace: JobWorkspace) -> Result<Self, DecodeError> {
        let ictx = ffmpeg::format::input(&path).map_err(DecodeError::ffmpeg("无法打开视频"))?;

        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(DecodeError::NoVideoStream)?;
        let stream_index = stream.index();

        let fps = rational_to_f64(stream.avg_frame_rate())
            .or_else(|| rational_to_f64(stream.rate()))
            .unwrap_or(0.0);
        if !(fps.is_finite() && fps > 0.0) {
            return Err(DecodeError::InvalidFrameRate(fps));
        }

        let decoder_context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(DecodeError::ffmpeg("无法创建解码器上下文"))?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(DecodeError::ffmpeg("无法创建视频解码器"))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(DecodeError::ffmpeg("无法创建缩放器"))?;

        debug!(
            "[帧来源] 打开视频: {} ({}x{}, {:.2} fps)",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps
        );

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            fps,
            eof_sent: false,
            finished: false,
            _workspace: workspace,
        })
    }

    fn into_decoded(self) -> DecodedVideo {
        DecodedVideo {
            fps: self.fps,
            width: self.decoder.width(),
            height: self.decoder.height(),
            frames: Box::new(self),
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame, DecodeError> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(DecodeError::ffmpeg("像素格式转换失败"))?;
        frame_to_image(&rgb)
    }
}

impl Iterator for FfmpegFrames {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame = self.convert(&decoded);
                if frame.is_err() {
                    self.finished = true;
                }
                return Some(frame);
            }

            if self.eof_sent {
                self.finished = true;
                return None;
            }

            let next_packet = self
                .ictx
                .packets()
                .find(|(stream, _)| stream.index() == self.stream_index)
                .map(|(_, packet)| packet);

            let sent = match next_packet {
                Some(packet) => self.decoder.send_packet(&packet),
                None => {
                    self.eof_sent = true;
                    self.decoder.send_eof()
                }
            };
            if let Err(e) = sent {
                self.finished = true;
                return Some(Err(DecodeError::Ffmpeg {
                    context: "发送数据包到解码器失败",
                    source: e,
                }));
            }
        }
    }
}

fn rational_to_f64(r: ffmpeg::Rational) -> Option<f64> {
    if r.numerator() > 0 && r.denominator() > 0 {
        Some(r.numerator() as f64 / r.denominator() as f64)
    } else {
        None
    }
}

/// RGB24 帧（带行对齐 stride）→ RgbImage
fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<Frame, DecodeError> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let row_bytes = width as usize * 3;
    let data = frame.data(0);

    if stride < row_bytes || data.len() < stride * height.saturating_sub(1) as usize + row_bytes {
        return Err(DecodeError::BadFrame(format!(
            "{}x{} stride={} len={}",
            width,
            height,
            stride,
            data.len()
        )));
    }

    let mut buf = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        buf.extend_from_slice(&data[start..start + row_bytes]);
    }
    RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| DecodeError::BadFrame(format!("{}x{}", width, height)))
}
