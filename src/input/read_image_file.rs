// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbFrame},
  input::FrameSource,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("帧数据错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
}

/// 单张图像，重复输出 `repeat` 次
pub struct ImageFileInput {
  frame: RgbFrame,
  remaining: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  /// `image:///path/to/face.png?repeat=30`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let repeat = match url.query_pairs().find(|(k, _)| k == "repeat") {
      Some((_, v)) => v.parse::<usize>().map_err(|e| {
        ImageFileInputError::InvalidParameter(format!("repeat 参数无效 '{}': {}", v, e))
      })?,
      None => 1,
    };

    Self::open(crate::decode_url_path(url), repeat)
  }
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P, repeat: usize) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    let frame = RgbFrame::try_from(image)?;
    info!(
      "读取图像 {}: {}x{}, 重复 {} 次",
      path.display(),
      frame.width(),
      frame.height(),
      repeat
    );
    Ok(Self::from_frame(frame, repeat))
  }

  pub fn from_frame(frame: RgbFrame, repeat: usize) -> Self {
    Self {
      frame,
      remaining: repeat,
    }
  }
}

impl FrameSource for ImageFileInput {
  fn is_ready(&mut self) -> bool {
    true
  }

  fn current_frame(&mut self) -> Option<RgbFrame> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    Some(self.frame.clone())
  }
}
