// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/draw.rs - 人脸预览可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
  rect::Rect,
};

use crate::{frame::RgbFrame, output::FacePreview};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const KEYPOINT_COLOR: [u8; 3] = [255, 0, 0];
const KEYPOINT_RADIUS: i32 = 2;
// 边框加粗为 2 像素
const BOX_THICKNESS: i32 = 2;

pub struct Draw {
  box_color: [u8; 3],
  keypoint_color: [u8; 3],
  keypoint_radius: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      box_color: BOX_COLOR,
      keypoint_color: KEYPOINT_COLOR,
      keypoint_radius: KEYPOINT_RADIUS,
    }
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for RgbFrame {
  fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width(), self.height(), |x, y| Rgb(self.pixel(x, y)))
  }
}

impl Draw {
  /// 绘制检测框与可见关键点。预览坐标的 y 轴向上，绘制时翻转为行号。
  pub fn draw_preview(&self, image: &mut RgbImage, preview: &FacePreview) {
    let height = image.height() as f32;
    let half = preview.size * 0.5;
    let left = (preview.center.x - half.x).floor() as i32;
    let top = (height - (preview.center.y + half.y)).floor() as i32;
    let width = preview.size.x.abs().round().max(1.0) as u32;
    let rows = preview.size.y.abs().round().max(1.0) as u32;

    for t in 0..BOX_THICKNESS {
      let inner_w = width.saturating_sub(2 * t as u32).max(1);
      let inner_h = rows.saturating_sub(2 * t as u32).max(1);
      let rect = Rect::at(left + t, top + t).of_size(inner_w, inner_h);
      draw_hollow_rect_mut(image, rect, Rgb(self.box_color));
    }

    for keypoint in preview.keypoints.iter().filter(|k| k.visible) {
      let x = keypoint.position.x.round() as i32;
      let y = (height - keypoint.position.y).round() as i32;
      draw_filled_circle_mut(image, (x, y), self.keypoint_radius, Rgb(self.keypoint_color));
    }
  }

  pub fn draw_frame(&self, frame: &RgbFrame, preview: Option<&FacePreview>) -> RgbImage {
    let mut image = frame.to_rgb_image();
    if let Some(preview) = preview {
      self.draw_preview(&mut image, preview);
    }
    image
  }
}
