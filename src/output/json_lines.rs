// 该文件是 Qingxu （情绪） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 记录输出
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
  fs::File,
  io::{BufWriter, Write},
  path::Path,
  sync::Mutex,
};

use chrono::Local;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{FacePreview, PreviewSink},
  pipeline::FrameReport,
};

#[derive(Error, Debug)]
pub enum JsonLinesError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("输出文件锁已损坏")]
  Poisoned,
}

/// 每个被处理的帧写入一行 JSON
pub struct JsonLinesOutput {
  writer: Mutex<BufWriter<File>>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesError;

  /// `jsonl:///path/to/report.jsonl`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::create(crate::decode_url_path(url))
  }
}

impl JsonLinesOutput {
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, JsonLinesError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    info!("写入 JSON Lines 记录: {}", path.display());
    Ok(Self {
      writer: Mutex::new(BufWriter::new(file)),
    })
  }

  fn write_line<T: Serialize>(&self, record: &T) -> Result<(), JsonLinesError> {
    let mut writer = self.writer.lock().map_err(|_| JsonLinesError::Poisoned)?;
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
  }
}

impl PreviewSink for JsonLinesOutput {
  type Error = JsonLinesError;

  fn show(&self, _frame: &RgbFrame, preview: &FacePreview) -> Result<(), Self::Error> {
    self.write_line(&json!({
      "timestamp": Local::now().to_rfc3339(),
      "preview": preview,
    }))
  }

  fn hide(&self, _frame: &RgbFrame) -> Result<(), Self::Error> {
    self.write_line(&json!({
      "timestamp": Local::now().to_rfc3339(),
      "preview": null,
    }))
  }

  fn render_result(&self, _frame: &RgbFrame, report: &FrameReport) -> Result<(), Self::Error> {
    self.write_line(&json!({
      "timestamp": Local::now().to_rfc3339(),
      "frame": report.frame_index,
      "outcome": report.outcome,
      "detection": report.detection,
      "preview": report.preview,
      "emotions": report.emotions,
    }))
  }
}
