// 该文件是 Qingxu （情绪） 项目的一部分。
// tests/pipeline_scenarios.rs - 使用脚本化后端的流水线场景测试
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

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, future::Future, sync::Arc};

use ndarray::{Array1, Array3};
use thiserror::Error;

use qingxu::{
  anchor::AnchorTable,
  config::{DetectorLayout, PipelineConfig},
  emotion::Emotion,
  frame::RgbFrame,
  input::IteratorSource,
  model::{InferenceBackend, Tensor},
  output::{FacePreview, PreviewSink},
  pipeline::{CycleOutcome, Pipeline, PipelineBuilder, SkipReason},
  schedule::CancelToken,
  task::{ContinuousTask, Task},
};

const NUM_ANCHORS: usize = 10;
const ROW_LEN: usize = 16;
const DETECTOR: usize = 0;
const CLASSIFIER: usize = 1;

#[derive(Debug, Error)]
#[error("脚本化后端失败: {0}")]
struct ScriptedError(&'static str);

/// 按脚本返回输出的后端。分类器脚本为空或遇到 `None` 时提交失败。
#[derive(Default)]
struct ScriptedBackend {
  loaded: usize,
  detector_outputs: Vec<Tensor>,
  classifier_script: VecDeque<Option<Vec<f32>>>,
  classifier_repeat: Option<Vec<f32>>,
  current_classifier: Vec<f32>,
  stall_read_back: bool,
  schedule_calls: [usize; 2],
}

impl ScriptedBackend {
  fn with_detector(boxes: Tensor, scores: Tensor) -> Self {
    Self {
      detector_outputs: vec![boxes, scores],
      ..Self::default()
    }
  }

  fn classifier_always(mut self, values: &[f32]) -> Self {
    self.classifier_repeat = Some(values.to_vec());
    self
  }

  fn classifier_script(mut self, script: Vec<Option<Vec<f32>>>) -> Self {
    self.classifier_script = script.into();
    self
  }
}

impl InferenceBackend for ScriptedBackend {
  type Handle = usize;
  type Pending = Tensor;
  type Error = ScriptedError;

  fn load(&mut self, _blob: &[u8]) -> Result<Self::Handle, Self::Error> {
    let handle = self.loaded;
    self.loaded += 1;
    Ok(handle)
  }

  fn schedule(&mut self, handle: &Self::Handle, _input: &Tensor) -> Result<(), Self::Error> {
    self.schedule_calls[*handle] += 1;
    if *handle == CLASSIFIER {
      let next = match self.classifier_script.pop_front() {
        Some(step) => step,
        None => self.classifier_repeat.clone(),
      };
      self.current_classifier = next.ok_or(ScriptedError("分类器"))?;
    }
    Ok(())
  }

  fn peek_output(
    &mut self,
    handle: &Self::Handle,
    index: usize,
  ) -> Result<Self::Pending, Self::Error> {
    match *handle {
      DETECTOR => self
        .detector_outputs
        .get(index)
        .cloned()
        .ok_or(ScriptedError("检测输出")),
      _ => Ok(Array1::from(self.current_classifier.clone()).into_dyn()),
    }
  }

  fn read_back(
    &mut self,
    pending: Self::Pending,
  ) -> impl Future<Output = Result<Tensor, Self::Error>> {
    let stall = self.stall_read_back;
    async move {
      if stall {
        std::future::pending::<()>().await;
      }
      Ok(pending)
    }
  }
}

/// 记录每帧调用的是 `show` 还是 `hide`
#[derive(Default)]
struct RecordingSink {
  shown: RefCell<Vec<bool>>,
}

impl PreviewSink for &RecordingSink {
  type Error = Infallible;

  fn show(&self, _frame: &RgbFrame, _preview: &FacePreview) -> Result<(), Self::Error> {
    self.shown.borrow_mut().push(true);
    Ok(())
  }

  fn hide(&self, _frame: &RgbFrame) -> Result<(), Self::Error> {
    self.shown.borrow_mut().push(false);
    Ok(())
  }
}

fn anchors() -> Arc<AnchorTable> {
  let text = "0.5, 0.5, 1.0, 1.0\n".repeat(NUM_ANCHORS);
  Arc::new(AnchorTable::parse(&text, NUM_ANCHORS).unwrap())
}

fn config() -> PipelineConfig {
  let mut config = PipelineConfig::default();
  config.detector.num_anchors = NUM_ANCHORS;
  config.detector.scores_are_logits = false;
  config.emotion.every_n_frames = 1;
  config
}

/// 每个 `(anchor, score, dx, size)` 在对应锚框处放一个正方形框，其余锚框分数为 0
fn raw_outputs(faces: &[(usize, f32, f32, f32)]) -> (Tensor, Tensor) {
  let mut boxes = Array3::<f32>::zeros((1, NUM_ANCHORS, ROW_LEN));
  let mut scores = Array3::<f32>::zeros((1, NUM_ANCHORS, 1));
  for &(anchor, score, dx, size) in faces {
    boxes[[0, anchor, 0]] = dx;
    boxes[[0, anchor, 2]] = size;
    boxes[[0, anchor, 3]] = size;
    scores[[0, anchor, 0]] = score;
  }
  (boxes.into_dyn(), scores.into_dyn())
}

fn single_face() -> ScriptedBackend {
  let (boxes, scores) = raw_outputs(&[(3, 0.9, 0.0, 40.0)]);
  ScriptedBackend::with_detector(boxes, scores)
}

fn build(
  config: PipelineConfig,
  backend: ScriptedBackend,
  cancel: CancelToken,
) -> Pipeline<ScriptedBackend> {
  PipelineBuilder::new(config)
    .cancel_token(cancel)
    .build(backend, b"detector", b"classifier", anchors())
    .unwrap()
}

fn frame() -> RgbFrame {
  RgbFrame::filled(128, 128, [90, 120, 150])
}

#[tokio::test]
async fn only_every_nth_frame_is_processed() {
  let mut config = config();
  config.emotion.every_n_frames = 15;
  let backend = single_face().classifier_always(&[0.2, 0.7, 0.1]);
  let mut pipeline = build(config, backend, CancelToken::new());
  let sink = RecordingSink::default();

  let frames = (0..47).map(|_| frame());
  let summary = ContinuousTask::default()
    .run_task(IteratorSource::new(frames), &mut pipeline, &sink)
    .await
    .unwrap();

  assert_eq!(summary.ticks, 47);
  assert_eq!(summary.processed, 3);
  assert_eq!(summary.detections, 3);
  assert!(!summary.cancelled);
  assert_eq!(pipeline.backend().schedule_calls, [3, 3]);
  assert_eq!(*sink.shown.borrow(), vec![true; 3]);
  assert_eq!(pipeline.emotion_state().updates, 3);
}

#[tokio::test]
async fn frame_limit_stops_the_loop() {
  let backend = single_face().classifier_always(&[0.2, 0.7, 0.1]);
  let mut pipeline = build(config(), backend, CancelToken::new());
  let sink = RecordingSink::default();

  let frames = (0..100).map(|_| frame());
  let summary = ContinuousTask::default()
    .with_frame_number(Some(5))
    .run_task(IteratorSource::new(frames), &mut pipeline, &sink)
    .await
    .unwrap();

  assert_eq!(summary.ticks, 5);
  assert_eq!(summary.processed, 5);
}

#[tokio::test]
async fn detection_feeds_classifier_and_smoother() {
  let backend = single_face().classifier_always(&[0.2, 0.7, 0.1]);
  let mut pipeline = build(config(), backend, CancelToken::new());
  let mut receiver = pipeline.subscribe();

  let report = pipeline.process_frame(&frame()).await;

  assert_eq!(report.outcome, CycleOutcome::Updated);
  let detection = report.detection.unwrap();
  assert_eq!(detection.anchor_index, 3);
  assert!((detection.center.x - 64.0).abs() < 1e-3);
  assert!((detection.center.y - 64.0).abs() < 1e-3);
  assert!(report.preview.is_some());

  let state = receiver.borrow_and_update().clone();
  assert!((state.emotions.get(Emotion::Neutral) - 0.2).abs() < 1e-6);
  assert!((state.emotions.get(Emotion::Surprised) - 0.7).abs() < 1e-6);
  assert!((state.emotions.get(Emotion::Sad) - 0.1).abs() < 1e-6);
  assert!(!state.error);
  assert_eq!(state.updates, 1);
}

#[tokio::test]
async fn overlapping_candidates_collapse_to_the_best() {
  // IoU 约 0.82，超过 0.3 的抑制阈值
  let (boxes, scores) = raw_outputs(&[(3, 0.6, 0.0, 40.0), (7, 0.9, 4.0, 40.0)]);
  let backend = ScriptedBackend::with_detector(boxes, scores).classifier_always(&[0.5, 0.5, 0.5]);
  let mut pipeline = build(config(), backend, CancelToken::new());

  let report = pipeline.process_frame(&frame()).await;

  let detection = report.detection.unwrap();
  assert_eq!(detection.anchor_index, 7);
  assert!((detection.score - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn high_score_threshold_yields_no_face() {
  let (boxes, scores) = raw_outputs(&[(3, 0.6, 0.0, 40.0), (7, 0.9, 4.0, 40.0)]);
  let backend = ScriptedBackend::with_detector(boxes, scores).classifier_always(&[0.5, 0.5, 0.5]);
  let mut config = config();
  config.detector.nms.score_threshold = 0.95;
  let mut pipeline = build(config, backend, CancelToken::new());

  let report = pipeline.process_frame(&frame()).await;

  assert_eq!(report.outcome, CycleOutcome::NoFace);
  assert!(report.detection.is_none());
  assert_eq!(pipeline.backend().schedule_calls, [1, 0]);
  assert_eq!(pipeline.emotion_state().updates, 0);
}

#[tokio::test]
async fn filtered_layout_uses_backend_index() {
  let indices = Array1::from(vec![7.0_f32]).into_dyn();
  let scores = Array1::from(vec![0.8_f32]).into_dyn();
  let mut boxes = Array3::<f32>::zeros((1, 1, ROW_LEN));
  boxes[[0, 0, 2]] = 40.0;
  boxes[[0, 0, 3]] = 40.0;
  let backend = ScriptedBackend {
    detector_outputs: vec![indices, scores, boxes.into_dyn()],
    ..ScriptedBackend::default()
  }
  .classifier_always(&[0.3, 0.3, 0.3]);

  let mut config = config();
  config.detector.layout = DetectorLayout::Filtered;
  let mut pipeline = build(config, backend, CancelToken::new());

  let report = pipeline.process_frame(&frame()).await;

  assert_eq!(report.outcome, CycleOutcome::Updated);
  assert_eq!(report.detection.unwrap().anchor_index, 7);
}

#[tokio::test]
async fn classifier_failure_keeps_last_values() {
  let backend = single_face().classifier_script(vec![
    Some(vec![0.2, 0.7, 0.1]),
    None,
    Some(vec![0.1, 0.1, 0.8]),
  ]);
  let mut pipeline = build(config(), backend, CancelToken::new());

  let first = pipeline.process_frame(&frame()).await;
  assert_eq!(first.outcome, CycleOutcome::Updated);

  let failed = pipeline.process_frame(&frame()).await;
  assert_eq!(failed.outcome, CycleOutcome::ClassifierFailed);
  assert!(failed.emotions.error);
  assert!((failed.emotions.emotions.get(Emotion::Surprised) - 0.7).abs() < 1e-6);
  assert_eq!(failed.emotions.updates, 1);

  let recovered = pipeline.process_frame(&frame()).await;
  assert_eq!(recovered.outcome, CycleOutcome::Updated);
  assert!(!recovered.emotions.error);
  assert!((recovered.emotions.emotions.get(Emotion::Sad) - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn all_zero_classifier_output_is_filtered() {
  let backend = single_face().classifier_script(vec![Some(vec![0.2, 0.7, 0.1]), Some(vec![0.0; 3])]);
  let mut pipeline = build(config(), backend, CancelToken::new());

  pipeline.process_frame(&frame()).await;
  let report = pipeline.process_frame(&frame()).await;

  assert_eq!(report.outcome, CycleOutcome::FilteredZero);
  assert_eq!(report.emotions.updates, 1);
  assert!((report.emotions.emotions.get(Emotion::Surprised) - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn empty_classifier_output_is_a_failure() {
  let backend = single_face().classifier_script(vec![Some(vec![0.2, 0.7, 0.1]), Some(vec![])]);
  let mut config = config();
  config.emotion.filter_all_zeros = false;
  let mut pipeline = build(config, backend, CancelToken::new());

  pipeline.process_frame(&frame()).await;
  let report = pipeline.process_frame(&frame()).await;

  assert_eq!(report.outcome, CycleOutcome::ClassifierFailed);
  assert!(report.emotions.error);
  assert_eq!(report.emotions.updates, 1);
  assert!((report.emotions.emotions.get(Emotion::Surprised) - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn manual_emotions_pin_the_state_until_cleared() {
  let backend = single_face().classifier_always(&[0.2, 0.7, 0.1]);
  let mut config = config();
  config.emotion.manual = Some([(Emotion::Happy, 0.6)].into_iter().collect());
  let mut pipeline = build(config, backend, CancelToken::new());

  let pinned = pipeline.process_frame(&frame()).await;
  assert_eq!(pinned.outcome, CycleOutcome::Overridden);
  assert!((pinned.emotions.emotions.get(Emotion::Happy) - 0.6).abs() < 1e-6);
  assert_eq!(pinned.emotions.emotions.get(Emotion::Surprised), 0.0);

  pipeline.smoother_mut().clear_override();
  let live = pipeline.process_frame(&frame()).await;
  assert_eq!(live.outcome, CycleOutcome::Updated);
  assert!((live.emotions.emotions.get(Emotion::Surprised) - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn zero_sized_box_skips_classification() {
  let (boxes, scores) = raw_outputs(&[(3, 0.9, 0.0, 0.0)]);
  let backend = ScriptedBackend::with_detector(boxes, scores).classifier_always(&[0.2, 0.7, 0.1]);
  let mut pipeline = build(config(), backend, CancelToken::new());

  let report = pipeline.process_frame(&frame()).await;

  assert_eq!(report.outcome, CycleOutcome::Skipped(SkipReason::DegenerateCrop));
  assert!(report.detection.is_some());
  assert_eq!(pipeline.backend().schedule_calls, [1, 0]);
}

#[tokio::test]
async fn cancel_during_read_back_releases_the_frame() {
  let mut backend = single_face().classifier_always(&[0.2, 0.7, 0.1]);
  backend.stall_read_back = true;
  let cancel = CancelToken::new();
  let mut pipeline = build(config(), backend, cancel.clone());
  let frame = frame();

  let (report, ()) = tokio::join!(pipeline.process_frame(&frame), async {
    tokio::task::yield_now().await;
    cancel.cancel();
  });

  assert_eq!(report.outcome, CycleOutcome::Cancelled);
  assert!(!report.was_processed());
  assert_eq!(pipeline.backend().schedule_calls, [1, 0]);
  assert_eq!(pipeline.emotion_state().updates, 0);
}

#[tokio::test]
async fn cancelled_token_stops_the_task_before_any_frame() {
  let backend = single_face().classifier_always(&[0.2, 0.7, 0.1]);
  let cancel = CancelToken::new();
  cancel.cancel();
  let mut pipeline = build(config(), backend, cancel);
  let sink = RecordingSink::default();

  let summary = ContinuousTask::default()
    .run_task(IteratorSource::new([frame()]), &mut pipeline, &sink)
    .await
    .unwrap();

  assert!(summary.cancelled);
  assert_eq!(summary.ticks, 0);
  assert!(sink.shown.borrow().is_empty());
}

#[tokio::test]
async fn anchor_count_mismatch_is_rejected() {
  let mut config = config();
  config.detector.num_anchors = 896;
  let result = PipelineBuilder::new(config).build::<_, 48, 48>(
    single_face(),
    b"detector",
    b"classifier",
    anchors(),
  );
  assert!(result.is_err());
}
