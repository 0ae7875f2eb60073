// 该文件是 Qingxu （情绪） 项目的一部分。
// src/frame.rs - NHWC 帧与裁剪缓冲区定义
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

//! 帧数据结构。
//!
//! 所有缓冲区均按 NHWC（行优先、自上而下）存储 RGB 字节。
//! 图像空间坐标以左下角为原点、y 轴向上，访问像素时由本模块负责换算行号。

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 源图像中的整数像素矩形，`y` 为矩形下边缘所在的行（自底向上计数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl PixelRect {
  pub fn area(&self) -> u64 {
    self.width as u64 * self.height as u64
  }
}

/// 任意尺寸的 RGB 视频帧
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn with_shape(height: u32, width: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 以单一颜色填充的帧，主要用于测试与占位
  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
    let mut frame = Self::with_shape(height, width);
    for pixel in frame.data.chunks_exact_mut(RGB_CHANNELS) {
      pixel.copy_from_slice(&color);
    }
    frame
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn full_rect(&self) -> PixelRect {
    PixelRect {
      x: 0,
      y: 0,
      width: self.width,
      height: self.height,
    }
  }

  /// 按存储顺序（自上而下的行号）读取像素
  pub fn pixel(&self, x: u32, row: u32) -> [u8; 3] {
    let idx = ((row as usize) * (self.width as usize) + x as usize) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  pub fn set_pixel(&mut self, x: u32, row: u32, color: [u8; 3]) {
    let idx = ((row as usize) * (self.width as usize) + x as usize) * RGB_CHANNELS;
    self.data[idx..idx + RGB_CHANNELS].copy_from_slice(&color);
  }

  /// 按图像空间（自底向上的行号）读取像素
  pub fn pixel_from_bottom(&self, x: u32, y: u32) -> [u8; 3] {
    self.pixel(x, self.height - 1 - y)
  }

  /// 在 `region` 内部做双线性采样。
  ///
  /// `(fx, fy)` 是相对于区域左下角的连续像素坐标，像素中心位于整数位置；
  /// 越界部分按边缘像素延伸，不会读取区域之外的数据。
  pub fn sample_bilinear(&self, region: &PixelRect, fx: f32, fy: f32) -> [f32; 3] {
    if region.area() == 0 {
      return [0.0; 3];
    }

    let max_x = region.width.saturating_sub(1) as f32;
    let max_y = region.height.saturating_sub(1) as f32;
    let fx = fx.clamp(0.0, max_x);
    let fy = fy.clamp(0.0, max_y);

    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let x0 = x0 as u32;
    let y0 = y0 as u32;
    let x1 = (x0 + 1).min(region.width - 1);
    let y1 = (y0 + 1).min(region.height - 1);

    let p00 = self.pixel_from_bottom(region.x + x0, region.y + y0);
    let p10 = self.pixel_from_bottom(region.x + x1, region.y + y0);
    let p01 = self.pixel_from_bottom(region.x + x0, region.y + y1);
    let p11 = self.pixel_from_bottom(region.x + x1, region.y + y1);

    let mut out = [0f32; 3];
    for c in 0..RGB_CHANNELS {
      let bottom = p00[c] as f32 * (1.0 - tx) + p10[c] as f32 * tx;
      let top = p01[c] as f32 * (1.0 - tx) + p11[c] as f32 * tx;
      out[c] = bottom * (1.0 - ty) + top * ty;
    }
    out
  }
}

/// 分类器输入的固定尺寸裁剪缓冲区，尺寸由类型参数决定
#[derive(Debug, Clone, PartialEq)]
pub struct CropBuffer<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> Default for CropBuffer<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0u8; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> CropBuffer<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, row: u32) -> [u8; 3] {
    let idx = ((row as usize) * (W as usize) + x as usize) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  pub fn set_pixel(&mut self, x: u32, row: u32, color: [u8; 3]) {
    let idx = ((row as usize) * (W as usize) + x as usize) * RGB_CHANNELS;
    self.data[idx..idx + RGB_CHANNELS].copy_from_slice(&color);
  }
}
