// 该文件是 Qingxu （情绪） 项目的一部分。
// src/nms.rs - 贪心非极大值抑制
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

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// IoU 分母中的平滑项，避免零面积框除零
pub const IOU_EPSILON: f32 = 1e-5;

/// 抑制参数。检测器路径与 [`predict_faces`] 共用同一算法，仅配置不同。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NmsConfig {
  pub score_threshold: f32,
  pub iou_threshold: f32,
  #[serde(default)]
  pub top_k: Option<usize>,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self::detector()
  }
}

impl NmsConfig {
  /// 检测器路径的默认配置
  pub const fn detector() -> Self {
    Self {
      score_threshold: 0.5,
      iou_threshold: 0.3,
      top_k: None,
    }
  }

  /// 独立打分数组（[`predict_faces`]）的默认配置
  pub const fn hard() -> Self {
    Self {
      score_threshold: 0.2,
      iou_threshold: 0.3,
      top_k: None,
    }
  }
}

/// 候选框，`bbox` 为 `[x_min, y_min, x_max, y_max]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub index: usize,
  pub score: f32,
  pub bbox: [f32; 4],
}

pub fn area(bbox: &[f32; 4]) -> f32 {
  (bbox[2] - bbox[0]).max(0.0) * (bbox[3] - bbox[1]).max(0.0)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let overlap = area(&[a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])]);
  overlap / (area(a) + area(b) - overlap + IOU_EPSILON)
}

/// 贪心 NMS。
///
/// 1. 丢弃分数低于 `score_threshold` 的候选（包括非有限分数）；
/// 2. 按分数降序稳定排序，同分保持输入顺序；
/// 3. 依次取出最高分候选加入结果，并移除与之 IoU 超过 `iou_threshold` 的剩余候选；
/// 4. 结果数量达到 `top_k` 时提前结束。
///
/// 返回的结果按分数从高到低排列，空结果表示本帧没有检测。
pub fn suppress(candidates: &[Candidate], config: &NmsConfig) -> Vec<Candidate> {
  let mut order: Vec<Candidate> = candidates
    .iter()
    .filter(|c| c.score.is_finite() && c.score >= config.score_threshold)
    .copied()
    .collect();
  order.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut remaining = VecDeque::from(order);
  let mut picked = Vec::new();

  while let Some(best) = remaining.pop_front() {
    picked.push(best);
    if config.top_k.is_some_and(|k| picked.len() >= k) {
      break;
    }
    remaining.retain(|c| iou(&best.bbox, &c.bbox) <= config.iou_threshold);
  }

  debug!(
    "NMS: 输入 {} 个候选, 保留 {} 个",
    candidates.len(),
    picked.len()
  );
  picked
}

/// 打分数组的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreLayout {
  /// 每个框一个分数
  Paired,
  /// 每个框一对 `(背景, 人脸)` 分数，取第二个
  Interleaved,
}

/// 像素坐标下的人脸框
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub score: f32,
}

/// 对归一化框 `[x1, y1, x2, y2]` 做 NMS 并缩放到 `width x height` 像素
pub fn predict_faces(
  width: u32,
  height: u32,
  scores: &[f32],
  boxes: &[f32],
  layout: ScoreLayout,
  config: &NmsConfig,
) -> Vec<FaceBox> {
  let face_scores: Vec<f32> = match layout {
    ScoreLayout::Paired => scores.to_vec(),
    ScoreLayout::Interleaved => scores.iter().skip(1).step_by(2).copied().collect(),
  };

  let candidates: Vec<Candidate> = boxes
    .chunks_exact(4)
    .zip(face_scores)
    .enumerate()
    .map(|(index, (b, score))| Candidate {
      index,
      score,
      bbox: [b[0], b[1], b[2], b[3]],
    })
    .collect();

  let (w, h) = (width as f32, height as f32);
  suppress(&candidates, config)
    .into_iter()
    .map(|c| FaceBox {
      x1: c.bbox[0] * w,
      y1: c.bbox[1] * h,
      x2: c.bbox[2] * w,
      y2: c.bbox[3] * h,
      score: c.score,
    })
    .collect()
}
