// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/save_image_file.rs - 保存预览图像文件
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

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{FacePreview, PreviewSink, draw::Draw},
  pipeline::FrameReport,
};

/// 文件名中的帧号占位符
const FRAME_PLACEHOLDER: &str = "{frame}";

pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  /// `image:///tmp/preview.png`，路径中的 `{frame}` 会被替换为帧号
  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: crate::decode_url_path(uri),
      draw: Draw::default(),
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      draw: Draw::default(),
    }
  }

  fn save(
    &self,
    path: &str,
    frame: &RgbFrame,
    preview: Option<&FacePreview>,
  ) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    self.draw.draw_frame(frame, preview).save(path)?;
    debug!("保存图像到文件: {}", path);
    Ok(())
  }
}

impl PreviewSink for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn show(&self, frame: &RgbFrame, preview: &FacePreview) -> Result<(), Self::Error> {
    self.save(&self.path, frame, Some(preview))
  }

  fn hide(&self, frame: &RgbFrame) -> Result<(), Self::Error> {
    self.save(&self.path, frame, None)
  }

  fn render_result(&self, frame: &RgbFrame, report: &FrameReport) -> Result<(), Self::Error> {
    let path = self
      .path
      .replace(FRAME_PLACEHOLDER, &format!("{:06}", report.frame_index));
    self.save(&path, frame, report.preview.as_ref())
  }
}
