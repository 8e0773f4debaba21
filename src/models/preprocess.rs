// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Letterbox 预处理: 等比缩放 + 灰边填充 + 归一化 + NCHW

use fast_image_resize as fr;
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::input::Frame;

/// Ultralytics 填充灰度
pub const PAD_VALUE: f32 = 114.0 / 255.0;

/// 原图 ↔ 张量 坐标变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub ratio: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub src_width: u32,
    pub src_height: u32,
}

impl Letterbox {
    /// 计算变换参数, 不做任何像素操作
    pub fn compute(src_width: u32, src_height: u32, target_w: u32, target_h: u32) -> Result<Self> {
        if src_width == 0 || src_height == 0 {
            return Err(Error::InvalidFrame {
                width: src_width,
                height: src_height,
            });
        }
        let ratio =
            (target_w as f32 / src_width as f32).min(target_h as f32 / src_height as f32);
        let (new_w, new_h) = Self::scaled(src_width, src_height, target_w, target_h);
        Ok(Self {
            ratio,
            pad_x: (target_w - new_w) / 2,
            pad_y: (target_h - new_h) / 2,
            src_width,
            src_height,
        })
    }

    // floor(w·ratio), 整数运算避免浮点误差把 416 算成 415
    fn scaled(w: u32, h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
        let (w, h, tw, th) = (w as u64, h as u64, target_w as u64, target_h as u64);
        let (new_w, new_h) = if tw * h <= th * w {
            (tw, h * tw / w)
        } else {
            (w * th / h, th)
        };
        (
            (new_w as u32).clamp(1, target_w.max(1)),
            (new_h as u32).clamp(1, target_h.max(1)),
        )
    }

    /// 缩放后 (未填充) 的尺寸
    pub fn resized(&self, target_w: u32, target_h: u32) -> (u32, u32) {
        Self::scaled(self.src_width, self.src_height, target_w, target_h)
    }

    /// 原图像素 → 张量坐标
    pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.ratio + self.pad_x as f32,
            y * self.ratio + self.pad_y as f32,
        )
    }

    /// 张量坐标 → 原图像素
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.ratio,
            (y - self.pad_y as f32) / self.ratio,
        )
    }
}

/// 帧 → (1, 3, target_h, target_w) 张量, 值域 [0,1]
pub fn letterbox(frame: &Frame, target_w: u32, target_h: u32) -> Result<(Array4<f32>, Letterbox)> {
    if frame.is_empty() || target_w == 0 || target_h == 0 {
        return Err(Error::InvalidFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }

    let lb = Letterbox::compute(frame.width(), frame.height(), target_w, target_h)?;
    let (new_w, new_h) = lb.resized(target_w, target_h);

    // fast_image_resize 双线性缩放 (RGB)
    let src = fr::images::ImageRef::new(
        frame.width(),
        frame.height(),
        frame.data(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| Error::Resize(e.to_string()))?;
    let mut dst = fr::images::Image::new(new_w, new_h, fr::PixelType::U8x3);
    fr::Resizer::new()
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| Error::Resize(e.to_string()))?;

    let mut tensor = Array4::from_elem((1, 3, target_h as usize, target_w as usize), PAD_VALUE);
    let (pad_x, pad_y) = (lb.pad_x as usize, lb.pad_y as usize);
    for (i, rgb) in dst.buffer().chunks_exact(3).enumerate() {
        let x = pad_x + i % new_w as usize;
        let y = pad_y + i / new_w as usize;
        for (c, &v) in rgb.iter().enumerate() {
            tensor[[0, c, y, x]] = v as f32 / 255.0;
        }
    }

    Ok((tensor, lb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shape_and_range() {
        let frame = Frame::filled(1920, 1080, [255, 0, 128]);
        let (x, lb) = letterbox(&frame, 640, 640).unwrap();
        assert_eq!(x.shape(), &[1, 3, 640, 640]);
        assert!(x.iter().all(|v| (0.0..=1.0).contains(v)));

        assert_eq!(lb.ratio, 640.0 / 1920.0);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 140);

        // 填充区为灰色, 图像区为原色
        assert_eq!(x[[0, 0, 0, 320]], PAD_VALUE);
        assert!((x[[0, 0, 320, 320]] - 1.0).abs() < 2.0 / 255.0);
        assert!(x[[0, 1, 320, 320]].abs() < 2.0 / 255.0);
    }

    #[test]
    fn non_square_target() {
        let frame = Frame::filled(100, 50, [10, 20, 30]);
        let (x, lb) = letterbox(&frame, 416, 320).unwrap();
        assert_eq!(x.shape(), &[1, 3, 320, 416]);
        assert_eq!(lb.resized(416, 320), (416, 208));
        assert_eq!(lb.pad_y, 56);
    }

    #[test]
    fn tiny_frame_still_gets_a_pixel() {
        let frame = Frame::filled(1000, 1, [1, 2, 3]);
        let (x, lb) = letterbox(&frame, 32, 32).unwrap();
        assert_eq!(x.shape(), &[1, 3, 32, 32]);
        assert_eq!(lb.resized(32, 32), (32, 1));
    }

    #[test]
    fn empty_frame_is_invalid() {
        let frame = Frame::new(0, 0, Vec::new()).unwrap();
        assert!(matches!(
            letterbox(&frame, 640, 640),
            Err(Error::InvalidFrame { width: 0, height: 0 })
        ));
    }

    #[test]
    fn forward_then_inverse_round_trips() {
        let lb = Letterbox::compute(1280, 720, 640, 640).unwrap();
        for &(x, y) in &[(0.0, 0.0), (100.0, 200.0), (1279.0, 719.0)] {
            let (tx, ty) = lb.forward(x, y);
            let (bx, by) = lb.inverse(tx, ty);
            assert!((bx - x).abs() <= 1.0, "{x} -> {bx}");
            assert!((by - y).abs() <= 1.0, "{y} -> {by}");
        }
    }
}
