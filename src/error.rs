// 该文件是 Qingxu （情绪） 项目的一部分。
// src/error.rs - 流水线错误汇总
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

use crate::{
  anchor::AnchorError, config::ConfigError, crop::CropError, emotion::EmotionError,
  geometry::GeometryError, model::DecodeError, schedule::ScheduleError,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("锚框错误: {0}")]
  Anchor(#[from] AnchorError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("情绪平滑器错误: {0}")]
  Emotion(#[from] EmotionError),
  #[error("帧调度错误: {0}")]
  Schedule(#[from] ScheduleError),
  #[error("几何变换错误: {0}")]
  Geometry(#[from] GeometryError),
  #[error("检测解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("裁剪错误: {0}")]
  Crop(#[from] CropError),
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] BoxedError),
  #[error("推理失败: {0}")]
  Inference(#[source] BoxedError),
}

impl PipelineError {
  pub fn model_load<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    PipelineError::ModelLoad(Box::new(err))
  }

  pub fn inference<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    PipelineError::Inference(Box::new(err))
  }
}
