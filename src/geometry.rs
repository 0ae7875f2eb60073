// 该文件是 Qingxu （情绪） 项目的一部分。
// src/geometry.rs - 模型空间与图像空间之间的仿射变换
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

use std::ops::{Add, Mul, Sub};

use ndarray::Array4;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
  #[error("无效的图像尺寸: {width}x{height} (模型输入 {input_size})")]
  InvalidGeometry {
    width: f32,
    height: f32,
    input_size: u32,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point2 {
  pub x: f32,
  pub y: f32,
}

impl Point2 {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  pub fn abs(self) -> Self {
    Self::new(self.x.abs(), self.y.abs())
  }

  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite()
  }
}

impl Add for Point2 {
  type Output = Point2;

  fn add(self, rhs: Point2) -> Point2 {
    Point2::new(self.x + rhs.x, self.y + rhs.y)
  }
}

impl Sub for Point2 {
  type Output = Point2;

  fn sub(self, rhs: Point2) -> Point2 {
    Point2::new(self.x - rhs.x, self.y - rhs.y)
  }
}

impl Mul<f32> for Point2 {
  type Output = Point2;

  fn mul(self, rhs: f32) -> Point2 {
    Point2::new(self.x * rhs, self.y * rhs)
  }
}

/// 2x3 仿射矩阵，作用于列向量 `[x, y, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2 {
  m: [[f32; 3]; 2],
}

impl Default for Affine2 {
  fn default() -> Self {
    Self::identity()
  }
}

impl Affine2 {
  pub const fn from_rows(m: [[f32; 3]; 2]) -> Self {
    Self { m }
  }

  pub const fn identity() -> Self {
    Self::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
  }

  pub const fn translation(t: Point2) -> Self {
    Self::from_rows([[1.0, 0.0, t.x], [0.0, 1.0, t.y]])
  }

  pub const fn scale(s: Point2) -> Self {
    Self::from_rows([[s.x, 0.0, 0.0], [0.0, s.y, 0.0]])
  }

  pub fn rows(&self) -> [[f32; 3]; 2] {
    self.m
  }

  /// 矩阵乘法 `self · rhs`：先应用 `rhs`，再应用 `self`
  pub fn compose(&self, rhs: &Affine2) -> Affine2 {
    let a = &self.m;
    let b = &rhs.m;
    Affine2::from_rows([
      [
        a[0][0] * b[0][0] + a[0][1] * b[1][0],
        a[0][0] * b[0][1] + a[0][1] * b[1][1],
        a[0][0] * b[0][2] + a[0][1] * b[1][2] + a[0][2],
      ],
      [
        a[1][0] * b[0][0] + a[1][1] * b[1][0],
        a[1][0] * b[0][1] + a[1][1] * b[1][1],
        a[1][0] * b[0][2] + a[1][1] * b[1][2] + a[1][2],
      ],
    ])
  }

  pub fn map_point(&self, p: Point2) -> Point2 {
    let m = &self.m;
    Point2::new(
      m[0][0] * p.x + m[0][1] * p.y + m[0][2],
      m[1][0] * p.x + m[1][1] * p.y + m[1][2],
    )
  }

  pub fn determinant(&self) -> f32 {
    self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
  }

  /// 逆变换；矩阵奇异时返回 `None`
  pub fn inverse(&self) -> Option<Affine2> {
    let det = self.determinant();
    if !det.is_finite() || det.abs() <= f32::EPSILON {
      return None;
    }

    let [[a, b, tx], [c, d, ty]] = self.m;
    let inv_det = 1.0 / det;
    let ia = d * inv_det;
    let ib = -b * inv_det;
    let ic = -c * inv_det;
    let id = a * inv_det;
    Some(Affine2::from_rows([
      [ia, ib, -(ia * tx + ib * ty)],
      [ic, id, -(ic * tx + id * ty)],
    ]))
  }
}

/// 构建从正方形模型输入空间到源图像空间的变换。
///
/// 较长边缩放到 `input_size`（保持宽高比，按正方形留边），并翻转 y 轴。
pub fn letterbox(width: f32, height: f32, input_size: u32) -> Result<Affine2, GeometryError> {
  let valid = |v: f32| v.is_finite() && v > 0.0;
  if !valid(width) || !valid(height) || input_size == 0 {
    return Err(GeometryError::InvalidGeometry {
      width,
      height,
      input_size,
    });
  }

  let size = width.max(height);
  let scale = size / input_size as f32;

  let transform = Affine2::translation(Point2::new(width - size, height + size) * 0.5)
    .compose(&Affine2::scale(Point2::new(scale, -scale)));
  debug!(
    "帧 {}x{} 的仿射变换: 缩放 {:.3}, 矩阵 {:?}",
    width,
    height,
    scale,
    transform.rows()
  );
  Ok(transform)
}

/// 图像坐标归一化到预览的世界坐标：以图像中心为原点、以图像高度为单位
pub fn image_to_world(position: Point2, width: f32, height: f32) -> Point2 {
  (position - Point2::new(width, height) * 0.5) * (1.0 / height)
}

/// 通过仿射变换采样检测器输入，返回 `[1, S, S, 3]` 张量，取值范围 `[-1, 1]`。
///
/// 模型像素 `(col, row)` 的中心映射到图像空间后做双线性采样，
/// 落在源图像之外的像素取 0 后再做归一化。
pub fn sample_affine(frame: &RgbFrame, transform: &Affine2, input_size: u32) -> Array4<f32> {
  let size = input_size as usize;
  let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
  let region = frame.full_rect();
  let (width, height) = (frame.width() as f32, frame.height() as f32);

  for row in 0..size {
    for col in 0..size {
      let p = transform.map_point(Point2::new(col as f32 + 0.5, row as f32 + 0.5));
      let rgb = if p.x >= 0.0 && p.x < width && p.y >= 0.0 && p.y < height {
        frame.sample_bilinear(&region, p.x - 0.5, p.y - 0.5)
      } else {
        [0.0; 3]
      };
      for (c, value) in rgb.iter().enumerate() {
        tensor[[0, row, col, c]] = 2.0 * (value / 255.0) - 1.0;
      }
    }
  }

  tensor
}
