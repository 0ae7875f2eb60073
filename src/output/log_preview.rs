// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/log_preview.rs - 日志预览输出
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

use std::convert::Infallible;

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{FacePreview, OutputError, PreviewSink},
  pipeline::FrameReport,
};

/// 把预览与情绪状态写入 tracing 日志
#[derive(Debug, Default)]
pub struct LogPreview;

impl FromUrlWithScheme for LogPreview {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogPreview {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogPreview)
  }
}

impl PreviewSink for LogPreview {
  type Error = Infallible;

  fn show(&self, _frame: &RgbFrame, preview: &FacePreview) -> Result<(), Self::Error> {
    let visible = preview.keypoints.iter().filter(|k| k.visible).count();
    info!(
      "人脸: 中心 ({:.1}, {:.1}), 尺寸 {:.1}x{:.1}, 可见关键点 {}/{}",
      preview.center.x,
      preview.center.y,
      preview.size.x,
      preview.size.y,
      visible,
      preview.keypoints.len()
    );
    Ok(())
  }

  fn hide(&self, _frame: &RgbFrame) -> Result<(), Self::Error> {
    debug!("隐藏预览");
    Ok(())
  }

  fn render_result(&self, frame: &RgbFrame, report: &FrameReport) -> Result<(), Self::Error> {
    match &report.preview {
      Some(preview) => self.show(frame, preview)?,
      None => self.hide(frame)?,
    }

    let state = &report.emotions;
    info!(
      "第 {} 帧 {:?}: 情绪指数 {:.3}, 错误 {}",
      report.frame_index, report.outcome, state.emotion_index, state.error
    );
    for (emotion, value) in state.emotions.iter().filter(|(_, v)| *v > 0.0) {
      debug!("  {}: {:.3}", emotion, value);
    }
    Ok(())
  }
}
