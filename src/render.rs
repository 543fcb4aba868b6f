use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detector::Detection;
use crate::frame_source::Frame;

/// 类别调色板，按 class_id 循环取色
const PALETTE: [(u8, u8, u8); 12] = [
    (255, 0, 0),     // 红色
    (0, 255, 0),     // 绿色
    (0, 0, 255),     // 蓝色
    (255, 255, 0),   // 黄色
    (255, 0, 255),   // 品红
    (0, 255, 255),   // 青色
    (255, 128, 0),   // 橙色
    (255, 0, 128),   // 粉红
    (128, 255, 0),   // 黄绿
    (0, 128, 255),   // 天蓝
    (255, 255, 255), // 白色
    (128, 0, 255),   // 紫色
];

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 18.0;

pub fn class_color(class_id: usize) -> Rgb<u8> {
    let (r, g, b) = PALETTE[class_id % PALETTE.len()];
    Rgb([r, g, b])
}

/// 检测结果绘制器
///
/// 没有配置字体时只画检测框，不写类别文字。
#[derive(Default)]
pub struct Renderer {
    font: Option<FontVec>,
}

impl Renderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    pub fn from_font_file(path: Option<&Path>) -> Result<Self> {
        let font = match path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("读取字体文件失败: {}", path.display()))?;
                let font = FontVec::try_from_vec(bytes)
                    .map_err(|e| anyhow::anyhow!("解析字体文件失败: {}: {}", path.display(), e))?;
                Some(font)
            }
            None => None,
        };
        Ok(Self::new(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 返回绘制了检测框的新帧，输入帧保持不变
    pub fn render(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut canvas = frame.clone();

        for det in detections {
            let color = class_color(det.class_id);
            let x = det.bbox.x1.round() as i32;
            let y = det.bbox.y1.round() as i32;
            let w = det.bbox.width().round().max(1.0) as i32;
            let h = det.bbox.height().round().max(1.0) as i32;

            for inset in 0..BOX_THICKNESS {
                let (bw, bh) = (w - 2 * inset, h - 2 * inset);
                if bw <= 0 || bh <= 0 {
                    break;
                }
                let rect = Rect::at(x + inset, y + inset).of_size(bw as u32, bh as u32);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            if let Some(font) = &self.font {
                let text = format!("{} {:.2}", det.label, det.confidence);
                let scale = PxScale::from(LABEL_SCALE);
                let (tw, th) = text_size(scale, font, &text);
                // 标签放在框上方，贴近画面顶部时放进框内
                let ty = if y - th as i32 - 2 >= 0 { y - th as i32 - 2 } else { y };
                let tab = Rect::at(x, ty).of_size(tw.max(1) + 4, th.max(1) + 2);
                draw_filled_rect_mut(&mut canvas, tab, color);
                draw_text_mut(&mut canvas, Rgb([0, 0, 0]), x + 2, ty + 1, scale, font, &text);
            }
        }

        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BoundingBox;
    use image::RgbImage;

    fn detection(class_id: usize, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            label: format!("class_{class_id}"),
            confidence: 0.9,
            bbox,
        }
    }

    #[test]
    fn render_keeps_dimensions_and_leaves_input_untouched() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([10, 10, 10]));
        let dets = vec![detection(0, BoundingBox::new(8.0, 8.0, 40.0, 30.0))];

        let out = Renderer::default().render(&frame, &dets);

        assert_eq!(out.dimensions(), frame.dimensions());
        assert_eq!(*frame.get_pixel(8, 8), Rgb([10, 10, 10]));
        assert_eq!(*out.get_pixel(8, 8), class_color(0));
        assert_eq!(*out.get_pixel(9, 9), class_color(0));
        // 框内部不填充
        assert_eq!(*out.get_pixel(20, 20), Rgb([10, 10, 10]));
    }

    #[test]
    fn render_without_detections_is_a_plain_copy() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let out = Renderer::default().render(&frame, &[]);
        assert_eq!(out, frame);
    }

    #[test]
    fn font_is_optional_but_must_exist_when_given() {
        assert!(!Renderer::from_font_file(None).unwrap().has_font());
        assert!(Renderer::from_font_file(Some(Path::new("/nonexistent/font.ttf"))).is_err());
    }

    #[test]
    fn boxes_partially_outside_the_frame_are_clipped() {
        let frame = RgbImage::new(20, 20);
        let dets = vec![
            detection(3, BoundingBox::new(-5.0, -5.0, 10.0, 10.0)),
            detection(4, BoundingBox::new(15.0, 15.0, 15.4, 15.2)),
        ];
        let out = Renderer::default().render(&frame, &dets);
        assert_eq!(out.dimensions(), (20, 20));
    }
}
