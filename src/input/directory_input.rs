// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input/directory_input.rs - 图像目录输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, input::FrameSource};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序逐帧读取目录中的图像，无法解码的文件被跳过
pub struct DirectoryInput {
  files: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  /// `folder:///path/to/frames`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(crate::decode_url_path(url))
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl DirectoryInput {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, DirectoryInputError> {
    let directory = directory.as_ref();
    let mut files = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image(path))
      .collect::<Vec<_>>();
    files.sort();

    info!("目录 {} 中找到 {} 张图像", directory.display(), files.len());
    Ok(Self {
      files: files.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl FrameSource for DirectoryInput {
  fn is_ready(&mut self) -> bool {
    true
  }

  fn current_frame(&mut self) -> Option<RgbFrame> {
    while let Some(path) = self.files.pop_front() {
      let frame = image::open(&path)
        .map_err(|e| e.to_string())
        .and_then(|image| RgbFrame::try_from(image.to_rgb8()).map_err(|e| e.to_string()));
      match frame {
        Ok(frame) => return Some(frame),
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for (name, value) in [("b.png", 2u8), ("a.png", 1u8)] {
      image::RgbImage::from_pixel(2, 2, image::Rgb([value; 3]))
        .save(dir.path().join(name))
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    std::fs::write(dir.path().join("broken.png"), "not a png").unwrap();

    let mut input = DirectoryInput::open(dir.path()).unwrap();
    assert_eq!(input.remaining(), 3);
    assert_eq!(input.current_frame().unwrap().pixel(0, 0), [1, 1, 1]);
    assert_eq!(input.current_frame().unwrap().pixel(0, 0), [2, 2, 2]);
    assert!(input.current_frame().is_none());
  }
}
