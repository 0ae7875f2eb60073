// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output.rs - 预览输出定义
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

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  geometry::{Point2, image_to_world},
  model::Detection,
  pipeline::FrameReport,
};

/// 预览叠加层接收者。每个被处理的帧调用一次 `show` 或 `hide`。
pub trait PreviewSink {
  type Error;

  fn show(&self, frame: &RgbFrame, preview: &FacePreview) -> Result<(), Self::Error>;

  /// 本帧没有检测结果
  fn hide(&self, frame: &RgbFrame) -> Result<(), Self::Error>;

  fn render_result(&self, frame: &RgbFrame, report: &FrameReport) -> Result<(), Self::Error> {
    match &report.preview {
      Some(preview) => self.show(frame, preview),
      None => self.hide(frame),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeypointPreview {
  pub position: Point2,
  pub world: Point2,
  /// 关键点是否落在帧内
  pub visible: bool,
}

/// 叠加层所需的检测信息：图像空间坐标及其世界空间归一化副本
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacePreview {
  pub center: Point2,
  pub size: Point2,
  pub world_center: Point2,
  pub world_size: Point2,
  pub keypoints: Vec<KeypointPreview>,
}

impl FacePreview {
  pub fn from_detection(detection: &Detection, width: f32, height: f32) -> Self {
    let size = detection.size();
    let inside = |p: Point2| p.x >= 0.0 && p.x <= width && p.y >= 0.0 && p.y <= height;
    Self {
      center: detection.center,
      size,
      world_center: image_to_world(detection.center, width, height),
      world_size: size * (1.0 / height),
      keypoints: detection
        .keypoints
        .iter()
        .map(|&position| KeypointPreview {
          position,
          world: image_to_world(position, width, height),
          visible: position.is_finite() && inside(position),
        })
        .collect(),
    }
  }
}

mod log_preview;
pub use self::log_preview::LogPreview;

mod json_lines;
pub use self::json_lines::{JsonLinesError, JsonLinesOutput};

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON Lines 输出错误: {0}")]
  JsonLinesError(#[from] JsonLinesError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  LogPreview(LogPreview),
  JsonLines(JsonLinesOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogPreview::SCHEME => Ok(OutputWrapper::LogPreview(LogPreview::from_url(url)?)),
      JsonLinesOutput::SCHEME => Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl PreviewSink for OutputWrapper {
  type Error = OutputError;

  fn show(&self, frame: &RgbFrame, preview: &FacePreview) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::LogPreview(output) => output.show(frame, preview).map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => output.show(frame, preview).map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => {
        output.show(frame, preview).map_err(OutputError::from)
      }
    }
  }

  fn hide(&self, frame: &RgbFrame) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::LogPreview(output) => output.hide(frame).map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => output.hide(frame).map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output.hide(frame).map_err(OutputError::from),
    }
  }

  fn render_result(&self, frame: &RgbFrame, report: &FrameReport) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::LogPreview(output) => {
        output.render_result(frame, report).map_err(|e| match e {})
      }
      OutputWrapper::JsonLines(output) => output
        .render_result(frame, report)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output
        .render_result(frame, report)
        .map_err(OutputError::from),
    }
  }
}
