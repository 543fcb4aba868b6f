use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::EncodeError;
use crate::frame_source::Frame;
use crate::workspace::JobWorkspace;

/// 帧输出端：把标注后的帧按原帧率重新编码为视频字节
pub trait FrameSink: Send + Sync {
    fn encode(&self, frames: &[Frame], fps: f64) -> Result<Vec<u8>, EncodeError>;
}

/// 检查帧序列可编码，返回统一的 (宽, 高)
pub fn validate_frames(frames: &[Frame], fps: f64) -> Result<(u32, u32), EncodeError> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(EncodeError::InvalidFrameRate(fps));
    }
    let first = frames.first().ok_or(EncodeError::NoFrames)?;
    let expected = first.dimensions();
    if expected.0 == 0 || expected.1 == 0 {
        return Err(EncodeError::InconsistentDimensions {
            index: 0,
            expected,
            actual: expected,
        });
    }
    for (index, frame) in frames.iter().enumerate().skip(1) {
        let actual = frame.dimensions();
        if actual != expected {
            return Err(EncodeError::InconsistentDimensions {
                index,
                expected,
                actual,
            });
        }
    }
    Ok(expected)
}

/// 通过 ffmpeg 命令行编码 H.264 MP4
///
/// 原始 RGB24 帧从 stdin 写入，编码结果写到任务独占的临时目录后读回。
#[derive(Debug, Clone)]
pub struct FfmpegFrameSink {
    ffmpeg_bin: PathBuf,
    work_dir: PathBuf,
}

impl FfmpegFrameSink {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, work_dir: impl AsRef<Path>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    fn command(&self, width: u32, height: u32, fps: f64, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-loglevel")
            .arg("error") // 只显示错误信息
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg("libx264")
            // yuv420p 要求宽高为偶数
            .arg("-vf")
            .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-movflags")
            .arg("+faststart")
            .arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl FrameSink for FfmpegFrameSink {
    fn encode(&self, frames: &[Frame], fps: f64) -> Result<Vec<u8>, EncodeError> {
        let (width, height) = validate_frames(frames, fps)?;

        let workspace = JobWorkspace::create(&self.work_dir)?;
        let output_path = workspace.file("annotated.mp4");

        let mut child = self.command(width, height, fps, &output_path).spawn()?;

        // stderr 在独立线程里读取，避免管道写满后与 stdin 互相阻塞
        let mut stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buf);
            }
            buf
        });

        let write_result = match child.stdin.take() {
            Some(mut stdin) => frames.iter().try_for_each(|f| stdin.write_all(f.as_raw())),
            None => Ok(()),
        };

        let status = child.wait()?;
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(EncodeError::Ffmpeg {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        write_result?;

        let bytes = std::fs::read(&output_path)?;
        debug!(
            "[帧输出] 编码完成: {} 帧, {}x{}, {:.2} fps, {} 字节",
            frames.len(),
            width,
            height,
            fps,
            bytes.len()
        );
        Ok(bytes)
    }
}
