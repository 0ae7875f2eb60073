// 该文件是 Qingxu （情绪） 项目的一部分。
// src/pipeline.rs - 单帧检测与情绪分类流程
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

//! 每个被放行的帧依次经过：仿射采样 → 检测推理 → 解码与 NMS → 裁剪 → 分类推理 → 平滑。
//!
//! 推理读回是唯一的挂起点，在该处与取消令牌竞争。本帧的所有缓冲区都归
//! [`Pipeline::process_frame`] 所有，任何退出路径都会释放。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
  PipelineError,
  anchor::{AnchorError, AnchorTable},
  config::{DetectorLayout, PipelineConfig},
  crop::{CropResampler, crop_rect_around},
  emotion::{EmotionSmoother, EmotionState, EmotionVector, UpdateOutcome},
  frame::RgbFrame,
  geometry::{letterbox, sample_affine},
  model::{Detection, DetectionDecoder, DetectorOutput, InferenceBackend, Tensor},
  output::FacePreview,
  schedule::{CancelToken, FrameScheduler},
};

/// 分类器默认输入边长
pub const DEFAULT_CROP_SIZE: u32 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  /// 帧调度器未放行
  NotAdmitted,
  InvalidGeometry,
  DetectorFailed,
  DecodeFailed,
  DegenerateCrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
  Updated,
  FilteredZero,
  Overridden,
  NoFace,
  ClassifierFailed,
  Skipped(SkipReason),
  Cancelled,
}

impl From<UpdateOutcome> for CycleOutcome {
  fn from(outcome: UpdateOutcome) -> Self {
    match outcome {
      UpdateOutcome::Applied => CycleOutcome::Updated,
      UpdateOutcome::FilteredZero => CycleOutcome::FilteredZero,
      UpdateOutcome::Overridden => CycleOutcome::Overridden,
    }
  }
}

/// 一帧的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
  pub frame_index: u64,
  pub outcome: CycleOutcome,
  pub detection: Option<Detection>,
  pub preview: Option<FacePreview>,
  pub emotions: EmotionState,
}

impl FrameReport {
  /// 本帧是否实际运行了检测流程
  pub fn was_processed(&self) -> bool {
    !matches!(
      self.outcome,
      CycleOutcome::Skipped(SkipReason::NotAdmitted) | CycleOutcome::Cancelled
    )
  }
}

pub struct PipelineBuilder {
  config: PipelineConfig,
  cancel: CancelToken,
}

impl PipelineBuilder {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      cancel: CancelToken::new(),
    }
  }

  pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn build<B: InferenceBackend, const W: u32, const H: u32>(
    self,
    mut backend: B,
    detector_blob: &[u8],
    classifier_blob: &[u8],
    anchors: Arc<AnchorTable>,
  ) -> Result<Pipeline<B, W, H>, PipelineError> {
    self.config.validate()?;

    let expected = self.config.detector.num_anchors;
    if anchors.len() != expected {
      error!("锚框数量 {} 与检测器配置 {} 不一致", anchors.len(), expected);
      return Err(PipelineError::Anchor(AnchorError::MalformedAnchorData(
        format!("预期锚框数量为 {}, 实际为 {}", expected, anchors.len()),
      )));
    }

    info!("加载检测模型");
    let detector = backend
      .load(detector_blob)
      .map_err(PipelineError::model_load)?;
    info!("加载分类模型");
    let classifier = backend
      .load(classifier_blob)
      .map_err(PipelineError::model_load)?;

    let scheduler = FrameScheduler::new(self.config.emotion.every_n_frames)?;
    let smoother = EmotionSmoother::from_config(&self.config.emotion)?;
    let decoder = DetectionDecoder::new(anchors, self.config.detector.clone());

    info!(
      "流水线就绪: 每 {} 帧处理一次, 平滑等级 {}, 裁剪 {}x{}",
      self.config.emotion.every_n_frames, self.config.emotion.smoothing, W, H
    );
    Ok(Pipeline {
      backend,
      detector,
      classifier,
      decoder,
      config: self.config,
      scheduler,
      resampler: CropResampler::new(),
      smoother,
      cancel: self.cancel,
      frame_index: 0,
    })
  }
}

pub struct Pipeline<
  B: InferenceBackend,
  const W: u32 = DEFAULT_CROP_SIZE,
  const H: u32 = DEFAULT_CROP_SIZE,
> {
  backend: B,
  detector: B::Handle,
  classifier: B::Handle,
  decoder: DetectionDecoder,
  config: PipelineConfig,
  scheduler: FrameScheduler,
  resampler: CropResampler<W, H>,
  smoother: EmotionSmoother,
  cancel: CancelToken,
  frame_index: u64,
}

impl<B: InferenceBackend, const W: u32, const H: u32> Pipeline<B, W, H> {
  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  pub fn emotion_state(&self) -> &EmotionState {
    self.smoother.state()
  }

  pub fn subscribe(&self) -> watch::Receiver<EmotionState> {
    self.smoother.subscribe()
  }

  pub fn smoother_mut(&mut self) -> &mut EmotionSmoother {
    &mut self.smoother
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  /// 推进帧调度器；未被放行的帧不做任何处理
  pub async fn on_frame(&mut self, frame: &RgbFrame) -> FrameReport {
    if self.scheduler.tick() {
      self.process_frame(frame).await
    } else {
      self.frame_index += 1;
      self.report(CycleOutcome::Skipped(SkipReason::NotAdmitted), None, None)
    }
  }

  /// 对一帧执行完整流程，不经过帧调度器
  pub async fn process_frame(&mut self, frame: &RgbFrame) -> FrameReport {
    self.frame_index += 1;
    let index = self.frame_index;
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let input_size = self.config.detector.input_size;

    let transform = match letterbox(width, height, input_size) {
      Ok(transform) => transform,
      Err(e) => {
        warn!("第 {} 帧跳过: {}", index, e);
        return self.report(CycleOutcome::Skipped(SkipReason::InvalidGeometry), None, None);
      }
    };

    let input = sample_affine(frame, &transform, input_size).into_dyn();
    let output_count = match self.config.detector.layout {
      DetectorLayout::Raw => 2,
      DetectorLayout::Filtered => 3,
    };
    let detector = self.detector.clone();
    let outputs = match self.infer(&detector, &input, output_count).await {
      Ok(Some(outputs)) => outputs,
      Ok(None) => return self.cancelled(index),
      Err(e) => {
        warn!("第 {} 帧检测推理失败: {}", index, e);
        return self.report(CycleOutcome::Skipped(SkipReason::DetectorFailed), None, None);
      }
    };
    drop(input);

    let mut outputs = outputs.into_iter();
    let layout = self.config.detector.layout;
    let output = match (layout, outputs.next(), outputs.next(), outputs.next()) {
      (DetectorLayout::Raw, Some(boxes), Some(scores), _) => DetectorOutput::Raw { scores, boxes },
      (DetectorLayout::Filtered, Some(indices), Some(scores), Some(boxes)) => {
        DetectorOutput::Filtered {
          indices,
          scores,
          boxes,
        }
      }
      _ => {
        warn!("第 {} 帧检测输出数量不足", index);
        return self.report(CycleOutcome::Skipped(SkipReason::DetectorFailed), None, None);
      }
    };

    let detection = match self.decoder.decode(&output, &transform) {
      Ok(Some(detection)) => detection,
      Ok(None) => {
        debug!("第 {} 帧没有检测到人脸", index);
        return self.report(CycleOutcome::NoFace, None, None);
      }
      Err(e) => {
        warn!("第 {} 帧解码失败: {}", index, e);
        return self.report(CycleOutcome::Skipped(SkipReason::DecodeFailed), None, None);
      }
    };
    drop(output);
    debug!(
      "第 {} 帧检测到人脸: 中心 ({:.1}, {:.1}), 分数 {:.3}",
      index, detection.center.x, detection.center.y, detection.score
    );

    let preview = FacePreview::from_detection(&detection, width, height);
    let rect = crop_rect_around(&detection, self.config.crop.scale_factor);
    let tensor = match self.resampler.resample(frame, &rect) {
      Ok(crop) => crop.to_tensor(self.config.crop.channels, self.config.crop.value_type),
      Err(_) => {
        return self.report(
          CycleOutcome::Skipped(SkipReason::DegenerateCrop),
          Some(detection),
          Some(preview),
        );
      }
    };

    let classifier = self.classifier.clone();
    let outcome: CycleOutcome = match self.infer(&classifier, &tensor, 1).await {
      Ok(Some(outputs)) => match outputs.first().filter(|t| !t.is_empty()) {
        Some(tensor) => {
          let values: Vec<f32> = tensor.iter().copied().collect();
          let raw = EmotionVector::from_classifier(&values, &self.config.emotion.labels);
          self.smoother.update(&raw).into()
        }
        None => {
          // 空输出视为推理失败，保留上一次的平滑值
          warn!("第 {} 帧情绪分类没有输出", index);
          self.smoother.mark_failure();
          CycleOutcome::ClassifierFailed
        }
      },
      Ok(None) => return self.cancelled(index),
      Err(e) => {
        warn!("第 {} 帧情绪分类失败: {}", index, e);
        self.smoother.mark_failure();
        CycleOutcome::ClassifierFailed
      }
    };

    self.report(outcome, Some(detection), Some(preview))
  }

  /// 提交输入并依次读回 `count` 个输出；读回期间被取消时返回 `Ok(None)`
  async fn infer(
    &mut self,
    handle: &B::Handle,
    input: &Tensor,
    count: usize,
  ) -> Result<Option<Vec<Tensor>>, PipelineError> {
    self
      .backend
      .schedule(handle, input)
      .map_err(PipelineError::inference)?;

    let mut tensors = Vec::with_capacity(count);
    for index in 0..count {
      let pending = self
        .backend
        .peek_output(handle, index)
        .map_err(PipelineError::inference)?;
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Ok(None),
        result = self.backend.read_back(pending) => {
          tensors.push(result.map_err(PipelineError::inference)?);
        }
      }
    }
    Ok(Some(tensors))
  }

  fn cancelled(&self, index: u64) -> FrameReport {
    info!("第 {} 帧在读回时被取消, 释放本帧缓冲区", index);
    self.report(CycleOutcome::Cancelled, None, None)
  }

  fn report(
    &self,
    outcome: CycleOutcome,
    detection: Option<Detection>,
    preview: Option<FacePreview>,
  ) -> FrameReport {
    FrameReport {
      frame_index: self.frame_index,
      outcome,
      detection,
      preview,
      emotions: self.smoother.state().clone(),
    }
  }
}
