// 该文件是 Qingxu （情绪） 项目的一部分。
// src/model/tract_backend.rs - 基于 tract 的 ONNX 推理后端
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

use std::{future::Future, io::Cursor};

use ndarray::{ArrayD, IxDyn};
use thiserror::Error;
use tracing::{debug, error, info};
use tract_onnx::prelude::{
  Framework, Graph, InferenceModelExt, SimplePlan, Tensor as TractTensor, TypedFact, TypedOp, tvec,
};

use crate::model::{InferenceBackend, Tensor};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Error, Debug)]
pub enum TractBackendError {
  #[error("模型加载错误: {0}")]
  ModelLoad(anyhow::Error),
  #[error("推理执行错误: {0}")]
  Execution(anyhow::Error),
  #[error("无效的模型句柄: {0}")]
  UnknownHandle(usize),
  #[error("模型 {0} 尚未提交输入")]
  NotScheduled(usize),
  #[error("输出下标 {index} 越界 (共 {count} 个)")]
  OutputOutOfRange { index: usize, count: usize },
  #[error("输出 {0} 已被取走")]
  OutputTaken(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TractHandle(usize);

#[derive(Debug)]
pub struct TractPending(Tensor);

/// 一次推理的输出，每个输出只能被取走一次
#[derive(Debug, Default)]
struct OutputSlots {
  slots: Option<Vec<Option<Tensor>>>,
}

impl OutputSlots {
  fn store(&mut self, outputs: Vec<Tensor>) {
    self.slots = Some(outputs.into_iter().map(Some).collect());
  }

  fn take(&mut self, handle: usize, index: usize) -> Result<Tensor, TractBackendError> {
    let slots = self
      .slots
      .as_mut()
      .ok_or(TractBackendError::NotScheduled(handle))?;
    let count = slots.len();
    slots
      .get_mut(index)
      .ok_or(TractBackendError::OutputOutOfRange { index, count })?
      .take()
      .ok_or(TractBackendError::OutputTaken(index))
  }
}

struct LoadedModel {
  runnable: RunnableModel,
  outputs: OutputSlots,
}

/// CPU 上同步执行的 ONNX 后端。`schedule` 时即完成推理，读回立即就绪。
#[derive(Default)]
pub struct TractBackend {
  models: Vec<LoadedModel>,
}

impl TractBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn model_mut(&mut self, handle: &TractHandle) -> Result<&mut LoadedModel, TractBackendError> {
    self
      .models
      .get_mut(handle.0)
      .ok_or(TractBackendError::UnknownHandle(handle.0))
  }
}

fn to_array(tensor: &TractTensor) -> Result<Tensor, TractBackendError> {
  let values = tensor.cast_to::<f32>().map_err(TractBackendError::Execution)?;
  let slice = values.as_slice::<f32>().map_err(TractBackendError::Execution)?;
  ArrayD::from_shape_vec(IxDyn(tensor.shape()), slice.to_vec())
    .map_err(|e| TractBackendError::Execution(anyhow::anyhow!(e)))
}

impl InferenceBackend for TractBackend {
  type Handle = TractHandle;
  type Pending = TractPending;
  type Error = TractBackendError;

  fn load(&mut self, blob: &[u8]) -> Result<Self::Handle, Self::Error> {
    debug!(
      "模型大小: {:.2} MB",
      blob.len() as f64 / (1024.0 * 1024.0)
    );
    let runnable = tract_onnx::onnx()
      .model_for_read(&mut Cursor::new(blob))
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| {
        error!("无法加载 ONNX 模型: {}", e);
        TractBackendError::ModelLoad(e)
      })?;

    self.models.push(LoadedModel {
      runnable,
      outputs: OutputSlots::default(),
    });
    let handle = TractHandle(self.models.len() - 1);
    info!("模型加载完成, 句柄 {}", handle.0);
    Ok(handle)
  }

  fn schedule(&mut self, handle: &Self::Handle, input: &Tensor) -> Result<(), Self::Error> {
    let model = self.model_mut(handle)?;
    let data: Vec<f32> = input.iter().copied().collect();
    let tensor =
      TractTensor::from_shape::<f32>(input.shape(), &data).map_err(TractBackendError::Execution)?;

    let outputs = model
      .runnable
      .run(tvec![tensor.into()])
      .map_err(TractBackendError::Execution)?;
    let outputs = outputs
      .iter()
      .map(|value| to_array(value))
      .collect::<Result<Vec<_>, _>>()?;
    debug!("模型 {} 推理完成, 输出 {} 个", handle.0, outputs.len());
    model.outputs.store(outputs);
    Ok(())
  }

  fn peek_output(
    &mut self,
    handle: &Self::Handle,
    index: usize,
  ) -> Result<Self::Pending, Self::Error> {
    let model = self.model_mut(handle)?;
    model.outputs.take(handle.0, index).map(TractPending)
  }

  fn read_back(
    &mut self,
    pending: Self::Pending,
  ) -> impl Future<Output = Result<Tensor, Self::Error>> {
    std::future::ready(Ok(pending.0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_handle_is_rejected() {
    let mut backend = TractBackend::new();
    let input = Tensor::zeros(IxDyn(&[1, 4]));
    assert!(matches!(
      backend.schedule(&TractHandle(3), &input),
      Err(TractBackendError::UnknownHandle(3))
    ));
  }

  #[test]
  fn outputs_are_moved_out_once() {
    let mut slots = OutputSlots::default();
    assert!(matches!(
      slots.take(0, 0),
      Err(TractBackendError::NotScheduled(0))
    ));

    slots.store(vec![
      Tensor::from_elem(IxDyn(&[2]), 1.0),
      Tensor::from_elem(IxDyn(&[3]), 2.0),
    ]);
    let second = slots.take(0, 1).unwrap();
    assert_eq!(second.shape(), &[3]);
    assert!(matches!(
      slots.take(0, 1),
      Err(TractBackendError::OutputTaken(1))
    ));
    assert!(matches!(
      slots.take(0, 2),
      Err(TractBackendError::OutputOutOfRange { index: 2, count: 2 })
    ));
    let first = slots.take(0, 0).unwrap();
    assert_eq!(first.iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0]);

    slots.store(vec![Tensor::zeros(IxDyn(&[1]))]);
    assert!(slots.take(0, 0).is_ok());
  }

  #[test]
  fn garbage_blob_fails_to_load() {
    let mut backend = TractBackend::new();
    assert!(matches!(
      backend.load(b"not an onnx model"),
      Err(TractBackendError::ModelLoad(_))
    ));
  }
}
