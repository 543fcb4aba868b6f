use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::InferenceError;
use crate::frame_source::Frame;
use crate::render::Renderer;

/// Ultralytics 导出模型的输入节点名
const INPUT_NAME: &str = "images";
/// letterbox 填充色（与 Ultralytics 预处理一致）
const PAD_VALUE: f32 = 144.0 / 255.0;

/// 检测框（原始帧像素坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// 单帧上的一个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// 目标检测器接口
///
/// 实现必须可以在多个任务之间共享只读调用。
pub trait Detector: Send + Sync {
    /// 对一帧做检测，返回的顺序没有意义
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;

    /// 生成叠加了检测框的新帧，尺寸与输入相同
    fn render(&self, frame: &Frame, detections: &[Detection]) -> Frame;
}

/// YOLO 检测器配置
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

/// 基于 ONNX Runtime 的 YOLOv8 检测器
///
/// 进程启动时加载一次，之后只读共享；推理在内部串行化。
pub struct YoloDetector {
    session: Mutex<Session>,
    names: Vec<String>,
    conf_threshold: f32,
    iou_threshold: f32,
    input_size: u32,
    renderer: Renderer,
}

impl YoloDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        if config.input_size == 0 {
            bail!("模型输入尺寸必须大于 0");
        }
        let session = Session::builder()
            .context("创建 ORT 会话构建器失败")?
            .commit_from_file(&config.model_path)
            .with_context(|| format!("加载检测模型失败: {}", config.model_path.display()))?;

        let names = match &config.labels_path {
            Some(path) => load_labels(path)?,
            None => {
                let from_metadata = session
                    .metadata()
                    .ok()
                    .and_then(|m| m.custom("names").ok().flatten())
                    .and_then(|raw| parse_names_metadata(&raw));
                from_metadata.unwrap_or_else(|| {
                    warn!("⚠️  [检测器] 模型中没有类别名称，将使用 class_<id> 作为标签");
                    Vec::new()
                })
            }
        };

        let renderer = Renderer::from_font_file(config.font_path.as_deref())?;
        if !renderer.has_font() {
            info!("[检测器] 未配置字体，标注时只绘制检测框");
        }

        info!(
            "✅ [检测器] 模型加载完成: {} (类别数: {}, 输入: {}x{}, conf={:.2}, iou={:.2})",
            config.model_path.display(),
            names.len(),
            config.input_size,
            config.input_size,
            config.conf_threshold,
            config.iou_threshold
        );

        Ok(Self {
            session: Mutex::new(session),
            names,
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
            input_size: config.input_size,
            renderer,
        })
    }

    fn label(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(InferenceError::MalformedFrame { width, height });
        }

        let letterbox = Letterbox::fit(width, height, self.input_size);
        let input = preprocess(frame, &letterbox, self.input_size);
        let tensor = Tensor::from_array(input)?;

        let candidates = {
            let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
            let outputs = session.run(ort::inputs![INPUT_NAME => tensor])?;
            let (_name, value) = outputs
                .iter()
                .next()
                .ok_or_else(|| InferenceError::UnexpectedOutput("模型没有输出".to_string()))?;
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            let dims: Vec<i64> = shape.iter().copied().collect();
            decode_output(&dims, data, self.conf_threshold, &letterbox)?
        };

        let kept = non_max_suppression(candidates, self.iou_threshold);
        debug!("[检测器] 检测到 {} 个目标", kept.len());

        Ok(kept
            .into_iter()
            .map(|c| Detection {
                label: self.label(c.class_id),
                class_id: c.class_id,
                confidence: c.confidence,
                bbox: c.bbox,
            })
            .collect())
    }

    fn render(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        self.renderer.render(frame, detections)
    }
}

/// 等比缩放到模型输入尺寸，图像放在左上角，其余填充
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    pub ratio: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    pub fn fit(frame_width: u32, frame_height: u32, input_size: u32) -> Self {
        let ratio = (input_size as f32 / frame_width as f32).min(input_size as f32 / frame_height as f32);
        let scaled_width = ((frame_width as f32 * ratio).round() as u32).clamp(1, input_size);
        let scaled_height = ((frame_height as f32 * ratio).round() as u32).clamp(1, input_size);
        Self {
            ratio,
            scaled_width,
            scaled_height,
            frame_width,
            frame_height,
        }
    }

    /// 模型坐标 (cx, cy, w, h) 还原为原始帧坐标并裁剪到画面内
    pub fn restore(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let fw = self.frame_width as f32;
        let fh = self.frame_height as f32;
        BoundingBox {
            x1: ((cx - w / 2.0) / self.ratio).clamp(0.0, fw),
            y1: ((cy - h / 2.0) / self.ratio).clamp(0.0, fh),
            x2: ((cx + w / 2.0) / self.ratio).clamp(0.0, fw),
            y2: ((cy + h / 2.0) / self.ratio).clamp(0.0, fh),
        }
    }
}

/// 帧 → NCHW 张量 [1, 3, S, S]，归一化到 [0, 1]
pub(crate) fn preprocess(frame: &Frame, letterbox: &Letterbox, input_size: u32) -> Array4<f32> {
    let size = input_size as usize;
    let mut input = Array4::from_elem((1, 3, size, size), PAD_VALUE);
    let resized = image::imageops::resize(
        frame,
        letterbox.scaled_width,
        letterbox.scaled_height,
        FilterType::Triangle,
    );
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = r as f32 / 255.0;
        input[[0, 1, y, x]] = g as f32 / 255.0;
        input[[0, 2, y, x]] = b as f32 / 255.0;
    }
    input
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// 解析 YOLOv8 输出
///
/// 支持 `[1, 4 + nc, anchors]` 与转置后的 `[1, anchors, 4 + nc]` 两种布局，
/// 特征维总是较小的那一维。
pub(crate) fn decode_output(
    dims: &[i64],
    data: &[f32],
    conf_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<Candidate>, InferenceError> {
    if dims.len() != 3 || dims.iter().any(|&d| d <= 0) {
        return Err(InferenceError::UnexpectedOutput(format!("{:?}", dims)));
    }
    let (a, b) = (dims[1] as usize, dims[2] as usize);
    if data.len() < a * b {
        return Err(InferenceError::UnexpectedOutput(format!(
            "形状 {:?} 需要 {} 个元素，实际 {}",
            dims,
            a * b,
            data.len()
        )));
    }
    let channels_first = a <= b;
    let (features, anchors) = if channels_first { (a, b) } else { (b, a) };
    if features < 5 {
        return Err(InferenceError::UnexpectedOutput(format!("{:?}", dims)));
    }
    let at = |feature: usize, anchor: usize| -> f32 {
        if channels_first {
            data[feature * anchors + anchor]
        } else {
            data[anchor * features + feature]
        }
    };

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (mut best_class, mut best_score) = (0usize, f32::MIN);
        for c in 0..features - 4 {
            let score = at(4 + c, i);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < conf_threshold {
            continue;
        }
        let bbox = letterbox.restore(at(0, i), at(1, i), at(2, i), at(3, i));
        if bbox.area() <= 0.0 {
            continue;
        }
        candidates.push(Candidate {
            class_id: best_class,
            confidence: best_score,
            bbox,
        });
    }
    Ok(candidates)
}

/// 按类别的贪心 NMS
pub(crate) fn non_max_suppression(mut boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// 读取类别文件，每行一个类别名
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取类别文件失败: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// 解析 Ultralytics 写入 ONNX 元数据的类别表，如 `{0: 'person', 1: 'bicycle'}`
pub fn parse_names_metadata(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut entries: Vec<(usize, String)> = Vec::new();
    for item in body.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (id, name) = item.split_once(':')?;
        let id: usize = id.trim().parse().ok()?;
        let name = name.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
        entries.push((id, name));
    }
    if entries.is_empty() {
        return None;
    }
    entries.sort_by_key(|(id, _)| *id);
    let mut names = Vec::with_capacity(entries.len());
    for (expected, (id, name)) in entries.into_iter().enumerate() {
        if id != expected {
            return None;
        }
        names.push(name);
    }
    Some(names)
}
