// 该文件是 Qingxu （情绪） 项目的一部分。
// src/crop.rs - 人脸裁剪与分类器输入预处理
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

use ndarray::Array4;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::{CropChannels, ValueType},
  frame::{CropBuffer, PixelRect, RgbFrame},
  geometry::Point2,
  model::{Detection, NOSE_KEYPOINT, Tensor},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CropError {
  #[error("裁剪区域退化: {0}")]
  DegenerateCrop(String),
}

/// 图像空间中的浮点裁剪窗口，`position` 为左下角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
  pub position: Point2,
  pub size: Point2,
}

/// 以鼻尖关键点为中心、检测框半宽高乘以 `scale_factor` 为边长的裁剪窗口
pub fn crop_rect_around(detection: &Detection, scale_factor: f32) -> CropRect {
  let anchor = detection
    .keypoint(NOSE_KEYPOINT)
    .unwrap_or(detection.center);
  let size = detection.half_extent().abs() * scale_factor;
  CropRect {
    position: anchor - size * 0.5,
    size,
  }
}

/// 将浮点窗口收紧到源图像的整数像素范围内
pub fn clamp_rect(rect: &CropRect, width: u32, height: u32) -> Result<PixelRect, CropError> {
  if width == 0 || height == 0 {
    return Err(CropError::DegenerateCrop(format!(
      "源图像尺寸为 {}x{}",
      width, height
    )));
  }
  if !rect.position.is_finite() || !rect.size.is_finite() {
    return Err(CropError::DegenerateCrop(format!("非有限坐标: {:?}", rect)));
  }
  if rect.size.x <= 0.0 || rect.size.y <= 0.0 {
    return Err(CropError::DegenerateCrop(format!(
      "尺寸 {}x{} 不为正",
      rect.size.x, rect.size.y
    )));
  }

  let clamp_floor = |v: f32, lo: u32, hi: u32| (v.floor().max(0.0) as u32).clamp(lo, hi);
  let x = clamp_floor(rect.position.x, 0, width - 1);
  let y = clamp_floor(rect.position.y, 0, height - 1);
  Ok(PixelRect {
    x,
    y,
    width: clamp_floor(rect.size.x, 1, width - x),
    height: clamp_floor(rect.size.y, 1, height - y),
  })
}

/// 把源图像区域双线性缩放到固定尺寸 `W x H`，并保留最近一次成功的结果
#[derive(Debug, Default)]
pub struct CropResampler<const W: u32, const H: u32> {
  last: Option<CropBuffer<W, H>>,
}

impl<const W: u32, const H: u32> CropResampler<W, H> {
  pub fn new() -> Self {
    Self { last: None }
  }

  pub fn last(&self) -> Option<&CropBuffer<W, H>> {
    self.last.as_ref()
  }

  pub fn resample(
    &mut self,
    frame: &RgbFrame,
    rect: &CropRect,
  ) -> Result<&CropBuffer<W, H>, CropError> {
    let region = clamp_rect(rect, frame.width(), frame.height()).inspect_err(|e| {
      warn!("{}, 保留上一帧裁剪结果", e);
    })?;
    debug!(
      "裁剪区域 ({}, {}) {}x{} -> {}x{}",
      region.x, region.y, region.width, region.height, W, H
    );

    let mut crop = CropBuffer::<W, H>::default();
    let (rw, rh) = (region.width as f32, region.height as f32);
    for i in 0..H {
      let v = i as f32 / H as f32;
      for j in 0..W {
        let u = j as f32 / W as f32;
        let rgb = frame.sample_bilinear(&region, u * rw - 0.5, v * rh - 0.5);
        // i 自底向上计数，写入时翻转为存储行号
        crop.set_pixel(j, H - 1 - i, rgb.map(|c| c.round().clamp(0.0, 255.0) as u8));
      }
    }

    Ok(self.last.insert(crop))
  }
}

impl<const W: u32, const H: u32> CropBuffer<W, H> {
  /// 转换为 `[1, H, W, C]` 的分类器输入张量
  pub fn to_tensor(&self, channels: CropChannels, value_type: ValueType) -> Tensor {
    let c = channels.count();
    let mut tensor = Array4::<f32>::zeros((1, H as usize, W as usize, c));
    for row in 0..H {
      for x in 0..W {
        let [r, g, b] = self.pixel(x, row).map(f32::from);
        let (row, x) = (row as usize, x as usize);
        match channels {
          CropChannels::Luma => {
            let luma = 0.299 * r + 0.587 * g + 0.114 * b;
            tensor[[0, row, x, 0]] = value_type.normalize(luma);
          }
          CropChannels::Rgb => {
            for (k, value) in [r, g, b].into_iter().enumerate() {
              tensor[[0, row, x, k]] = value_type.normalize(value);
            }
          }
        }
      }
    }
    tensor.into_dyn()
  }
}
