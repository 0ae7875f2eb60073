// 该文件是 Qingxu （情绪） 项目的一部分。
// src/input.rs - 视频帧输入
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

use thiserror::Error;

use crate::{FromUrl, frame::RgbFrame};

/// 帧来源。驱动循环每次迭代先询问 `is_ready`，再取帧。
pub trait FrameSource {
  /// 当前是否有新帧可取；文件类来源始终就绪，结束由 `current_frame` 返回 `None` 表示
  fn is_ready(&mut self) -> bool;

  /// 取出当前帧；`None` 表示流已结束
  fn current_frame(&mut self) -> Option<RgbFrame>;
}

/// 任意帧迭代器，始终就绪
pub struct IteratorSource<I> {
  inner: I,
}

impl<I: Iterator<Item = RgbFrame>> IteratorSource<I> {
  pub fn new(inner: impl IntoIterator<IntoIter = I>) -> Self {
    Self {
      inner: inner.into_iter(),
    }
  }
}

impl<I: Iterator<Item = RgbFrame>> FrameSource for IteratorSource<I> {
  fn is_ready(&mut self) -> bool {
    true
  }

  fn current_frame(&mut self) -> Option<RgbFrame> {
    self.inner.next()
  }
}

#[cfg(feature = "image")]
impl TryFrom<image::RgbImage> for RgbFrame {
  type Error = crate::frame::FrameError;

  fn try_from(image: image::RgbImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    RgbFrame::from_raw(width, height, image.into_raw())
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "directory_input")]
mod directory_input;
#[cfg(feature = "directory_input")]
pub use self::directory_input::{DirectoryInput, DirectoryInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "directory_input")]
  #[error("目录输入错误: {0}")]
  DirectoryInputError(#[from] DirectoryInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "directory_input")]
  Directory(DirectoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "directory_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DirectoryInput::SCHEME {
        let input = DirectoryInput::from_url(url)?;
        return Ok(InputWrapper::Directory(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn is_ready(&mut self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_ready(),
      #[cfg(feature = "directory_input")]
      InputWrapper::Directory(input) => input.is_ready(),
      #[allow(unreachable_patterns)]
      _ => false,
    }
  }

  fn current_frame(&mut self) -> Option<RgbFrame> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.current_frame(),
      #[cfg(feature = "directory_input")]
      InputWrapper::Directory(input) => input.current_frame(),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }
}
