// 该文件是 Qingxu （情绪） 项目的一部分。
// src/model.rs - 推理后端抽象
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

use std::future::Future;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 后端之间传递的张量，统一为 `f32`
pub type Tensor = ndarray::ArrayD<f32>;

/// 神经网络执行后端。
///
/// 一次推理分为三步：`schedule` 提交输入，`peek_output` 取得某个输出的待读句柄，
/// `read_back` 异步读回结果。读回是流水线中唯一的挂起点。
pub trait InferenceBackend {
  /// 已加载模型的句柄
  type Handle: Clone;
  /// 尚未读回的输出
  type Pending;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&mut self, blob: &[u8]) -> Result<Self::Handle, Self::Error>;

  fn schedule(&mut self, handle: &Self::Handle, input: &Tensor) -> Result<(), Self::Error>;

  fn peek_output(
    &mut self,
    handle: &Self::Handle,
    index: usize,
  ) -> Result<Self::Pending, Self::Error>;

  fn read_back(
    &mut self,
    pending: Self::Pending,
  ) -> impl Future<Output = Result<Tensor, Self::Error>>;
}

#[derive(Error, Debug)]
pub enum ModelFileError {
  #[error("模型路径必须使用 onnx 方案, 实际为 '{0}'")]
  SchemeMismatch(String),
  #[error("模型文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 从磁盘读取的模型二进制，交给 [`InferenceBackend::load`]
#[derive(Debug, Clone)]
pub struct ModelFile {
  blob: Vec<u8>,
}

impl FromUrlWithScheme for ModelFile {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for ModelFile {
  type Error = ModelFileError;

  /// `onnx:///path/to/model.onnx`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelFileError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = crate::decode_url_path(url);
    info!("加载模型文件: {}", path);
    let blob = std::fs::read(&path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      blob.len() as f64 / (1024.0 * 1024.0)
    );
    Ok(Self { blob })
  }
}

impl ModelFile {
  pub fn as_bytes(&self) -> &[u8] {
    &self.blob
  }
}

pub mod decode;
pub use self::decode::{DecodeError, Detection, DetectionDecoder, DetectorOutput, NOSE_KEYPOINT};

#[cfg(feature = "tract_backend")]
mod tract_backend;
#[cfg(feature = "tract_backend")]
pub use self::tract_backend::{TractBackend, TractBackendError, TractHandle, TractPending};
