// 该文件是 Qingxu （情绪） 项目的一部分。
// src/model/decode.rs - 检测器输出解码
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

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  anchor::AnchorTable,
  config::DetectorConfig,
  geometry::{Affine2, Point2},
  model::Tensor,
  nms::{Candidate, suppress},
};

/// 鼻尖关键点的下标
pub const NOSE_KEYPOINT: usize = 2;

const SIGMOID_CLIP: f32 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("回归行长度不足: 期望至少 {expected}, 实际 {actual}")]
  RowTooShort { expected: usize, actual: usize },
  #[error("锚框下标 {index} 越界 (共 {len} 个)")]
  AnchorOutOfRange { index: usize, len: usize },
  #[error("输出形状不匹配: {0}")]
  ShapeMismatch(String),
}

/// 一次检测推理的输出
#[derive(Debug, Clone)]
pub enum DetectorOutput {
  /// 每个锚框的分数与回归量，NMS 由解码器完成
  Raw { scores: Tensor, boxes: Tensor },
  /// 后端已完成 NMS，按分数降序排列
  Filtered {
    indices: Tensor,
    scores: Tensor,
    boxes: Tensor,
  },
}

/// 图像空间中的单个人脸检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub top_left: Point2,
  pub bottom_right: Point2,
  pub center: Point2,
  pub score: f32,
  pub keypoints: Vec<Point2>,
  pub anchor_index: usize,
}

impl Detection {
  pub fn size(&self) -> Point2 {
    self.bottom_right - self.top_left
  }

  pub fn half_extent(&self) -> Point2 {
    self.size() * 0.5
  }

  pub fn keypoint(&self, index: usize) -> Option<Point2> {
    self.keypoints.get(index).copied()
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x.clamp(-SIGMOID_CLIP, SIGMOID_CLIP)).exp())
}

fn flatten(tensor: &Tensor) -> Vec<f32> {
  tensor.iter().copied().collect()
}

/// 无状态的检测解码器，锚框表在帧之间共享
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  anchors: Arc<AnchorTable>,
  config: DetectorConfig,
}

impl DetectionDecoder {
  pub fn new(anchors: Arc<AnchorTable>, config: DetectorConfig) -> Self {
    Self { anchors, config }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 每行回归量的最小长度 `4 + 2K`
  pub fn row_len(&self) -> usize {
    4 + 2 * self.config.num_keypoints
  }

  fn score(&self, raw: f32) -> f32 {
    if self.config.scores_are_logits {
      sigmoid(raw)
    } else {
      raw.clamp(0.0, 1.0)
    }
  }

  fn anchor_center(&self, index: usize) -> Result<Point2, DecodeError> {
    let anchor = self
      .anchors
      .get(index)
      .ok_or(DecodeError::AnchorOutOfRange {
        index,
        len: self.anchors.len(),
      })?;
    let size = self.config.input_size as f32;
    Ok(Point2::new(anchor.center_x, anchor.center_y) * size)
  }

  /// 在模型空间中为每个锚框构建候选框
  pub fn candidates(&self, scores: &[f32], boxes: &[f32]) -> Result<Vec<Candidate>, DecodeError> {
    let n = self.anchors.len();
    if scores.len() != n {
      return Err(DecodeError::ShapeMismatch(format!(
        "分数数量 {} 与锚框数量 {} 不一致",
        scores.len(),
        n
      )));
    }
    let stride = row_stride(boxes.len(), n)?;
    if stride < self.row_len() {
      return Err(DecodeError::RowTooShort {
        expected: self.row_len(),
        actual: stride,
      });
    }

    boxes
      .chunks_exact(stride)
      .zip(scores)
      .enumerate()
      .map(|(index, (d, raw))| {
        let center = self.anchor_center(index)? + Point2::new(d[0], d[1]);
        let half = Point2::new(d[2], d[3]).abs() * 0.5;
        Ok(Candidate {
          index,
          score: self.score(*raw),
          bbox: [
            center.x - half.x,
            center.y - half.y,
            center.x + half.x,
            center.y + half.y,
          ],
        })
      })
      .collect()
  }

  /// 将锚框 `index` 的回归行映射到图像空间
  pub fn decode_anchor(
    &self,
    index: usize,
    row: &[f32],
    score: f32,
    transform: &Affine2,
  ) -> Result<Detection, DecodeError> {
    if row.len() < self.row_len() {
      return Err(DecodeError::RowTooShort {
        expected: self.row_len(),
        actual: row.len(),
      });
    }

    let anchor_center = self.anchor_center(index)?;
    let box_start = anchor_center + Point2::new(row[0], row[1]);
    let box_end = box_start + Point2::new(row[2], row[3]) * 0.5;

    let center = transform.map_point(box_start);
    // y 轴翻转后半宽高可能为负，取绝对值保证角点有序
    let half = (transform.map_point(box_end) - center).abs();

    let keypoints = (0..self.config.num_keypoints)
      .map(|j| {
        let offset = Point2::new(row[4 + 2 * j], row[5 + 2 * j]);
        transform.map_point(anchor_center + offset)
      })
      .collect();

    Ok(Detection {
      top_left: center - half,
      bottom_right: center + half,
      center,
      score,
      keypoints,
      anchor_index: index,
    })
  }

  /// 解码一帧的检测输出；没有候选时返回 `Ok(None)`
  pub fn decode(
    &self,
    output: &DetectorOutput,
    transform: &Affine2,
  ) -> Result<Option<Detection>, DecodeError> {
    match output {
      DetectorOutput::Raw { scores, boxes } => {
        let scores = flatten(scores);
        let boxes = flatten(boxes);
        let candidates = self.candidates(&scores, &boxes)?;
        let picked = suppress(&candidates, &self.config.nms);
        let Some(best) = picked.first() else {
          debug!("没有超过阈值的候选框");
          return Ok(None);
        };

        let stride = boxes.len() / self.anchors.len();
        let row = &boxes[best.index * stride..(best.index + 1) * stride];
        self.decode_anchor(best.index, row, best.score, transform).map(Some)
      }
      DetectorOutput::Filtered {
        indices,
        scores,
        boxes,
      } => {
        let scores = flatten(scores);
        let Some(raw_score) = scores.first().copied() else {
          debug!("后端未返回检测结果");
          return Ok(None);
        };
        let index = match indices.iter().next() {
          Some(v) if v.is_finite() && *v >= 0.0 => *v as usize,
          other => {
            error!("无效的锚框下标: {:?}", other);
            return Err(DecodeError::ShapeMismatch(format!(
              "无效的锚框下标: {:?}",
              other
            )));
          }
        };

        // 图内 NMS 输出的已是概率，不再做 sigmoid
        let score = raw_score.clamp(0.0, 1.0);
        let boxes = flatten(boxes);
        let stride = row_stride(boxes.len(), scores.len())?;
        self
          .decode_anchor(index, &boxes[..stride], score, transform)
          .map(Some)
      }
    }
  }
}

fn row_stride(total: usize, rows: usize) -> Result<usize, DecodeError> {
  if rows == 0 || total % rows != 0 {
    return Err(DecodeError::ShapeMismatch(format!(
      "回归量长度 {} 无法按 {} 行划分",
      total, rows
    )));
  }
  Ok(total / rows)
}

#[cfg(test)]
mod tests {
  use ndarray::{ArrayD, IxDyn};

  use super::*;
  use crate::geometry::letterbox;

  fn decoder(anchors: &str, count: usize, logits: bool) -> DetectionDecoder {
    let table = AnchorTable::parse(anchors, count).unwrap();
    let config = DetectorConfig {
      num_anchors: count,
      scores_are_logits: logits,
      ..DetectorConfig::default()
    };
    DetectionDecoder::new(Arc::new(table), config)
  }

  fn row(box_delta: [f32; 4]) -> Vec<f32> {
    let mut row = vec![0.0; 16];
    row[..4].copy_from_slice(&box_delta);
    row
  }

  #[test]
  fn decode_anchor_maps_through_flip() {
    let decoder = decoder("0.5,0.5,1,1\n", 1, false);
    let transform = letterbox(128.0, 128.0, 128).unwrap();
    let mut r = row([0.0, 0.0, 20.0, 10.0]);
    r[4 + 2 * NOSE_KEYPOINT] = 4.0;
    r[5 + 2 * NOSE_KEYPOINT] = -6.0;

    let det = decoder.decode_anchor(0, &r, 0.9, &transform).unwrap();
    assert_eq!(det.center, Point2::new(64.0, 64.0));
    assert_eq!(det.top_left, Point2::new(54.0, 59.0));
    assert_eq!(det.bottom_right, Point2::new(74.0, 69.0));
    assert_eq!(det.keypoint(NOSE_KEYPOINT), Some(Point2::new(68.0, 70.0)));
    assert!(det.bottom_right.x >= det.top_left.x);
    assert!(det.bottom_right.y >= det.top_left.y);
  }

  #[test]
  fn short_row_is_an_error() {
    let decoder = decoder("0.5,0.5,1,1\n", 1, false);
    let transform = Affine2::identity();
    assert_eq!(
      decoder.decode_anchor(0, &[0.0; 10], 0.9, &transform),
      Err(DecodeError::RowTooShort {
        expected: 16,
        actual: 10
      })
    );
  }

  #[test]
  fn raw_output_below_threshold_is_no_detection() {
    let decoder = decoder("0.5,0.5,1,1\n0.25,0.25,1,1\n", 2, true);
    let output = DetectorOutput::Raw {
      scores: ArrayD::from_shape_vec(IxDyn(&[1, 2, 1]), vec![-5.0, -3.0]).unwrap(),
      boxes: ArrayD::zeros(IxDyn(&[1, 2, 16])),
    };
    let transform = letterbox(640.0, 480.0, 128).unwrap();
    assert_eq!(decoder.decode(&output, &transform).unwrap(), None);
  }

  #[test]
  fn raw_output_picks_highest_score() {
    let decoder = decoder("0.5,0.5,1,1\n0.25,0.25,1,1\n", 2, true);
    let mut boxes = row([0.0, 0.0, 10.0, 10.0]);
    boxes.extend(row([0.0, 0.0, 10.0, 10.0]));
    let output = DetectorOutput::Raw {
      scores: ArrayD::from_shape_vec(IxDyn(&[1, 2, 1]), vec![1.0, 3.0]).unwrap(),
      boxes: ArrayD::from_shape_vec(IxDyn(&[1, 2, 16]), boxes).unwrap(),
    };
    let transform = letterbox(128.0, 128.0, 128).unwrap();
    let det = decoder.decode(&output, &transform).unwrap().unwrap();
    assert_eq!(det.anchor_index, 1);
    assert!((det.score - sigmoid(3.0)).abs() < 1e-6);
    assert_eq!(det.center, Point2::new(32.0, 96.0));
  }

  #[test]
  fn filtered_output_uses_first_row() {
    let decoder = decoder("0.5,0.5,1,1\n0.25,0.25,1,1\n", 2, false);
    let mut boxes = row([0.0, 0.0, 8.0, 8.0]);
    boxes.extend(row([0.0, 0.0, 2.0, 2.0]));
    let output = DetectorOutput::Filtered {
      indices: ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 0.0]).unwrap(),
      scores: ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.8, 0.6]).unwrap(),
      boxes: ArrayD::from_shape_vec(IxDyn(&[2, 16]), boxes).unwrap(),
    };
    let det = decoder
      .decode(&output, &Affine2::identity())
      .unwrap()
      .unwrap();
    assert_eq!(det.anchor_index, 1);
    assert_eq!(det.score, 0.8);
    assert_eq!(det.size(), Point2::new(8.0, 8.0));
  }

  #[test]
  fn filtered_scores_are_not_activated_twice() {
    let decoder = decoder("0.5,0.5,1,1\n", 1, true);
    let output = DetectorOutput::Filtered {
      indices: ArrayD::from_shape_vec(IxDyn(&[1]), vec![0.0]).unwrap(),
      scores: ArrayD::from_shape_vec(IxDyn(&[1]), vec![0.75]).unwrap(),
      boxes: ArrayD::from_shape_vec(IxDyn(&[1, 16]), row([0.0, 0.0, 8.0, 8.0])).unwrap(),
    };
    let det = decoder
      .decode(&output, &Affine2::identity())
      .unwrap()
      .unwrap();
    assert_eq!(det.score, 0.75);
  }

  #[test]
  fn filtered_output_with_bad_index_is_an_error() {
    let decoder = decoder("0.5,0.5,1,1\n", 1, false);
    let output = DetectorOutput::Filtered {
      indices: ArrayD::from_shape_vec(IxDyn(&[1]), vec![5.0]).unwrap(),
      scores: ArrayD::from_shape_vec(IxDyn(&[1]), vec![0.8]).unwrap(),
      boxes: ArrayD::zeros(IxDyn(&[1, 16])),
    };
    assert_eq!(
      decoder.decode(&output, &Affine2::identity()),
      Err(DecodeError::AnchorOutOfRange { index: 5, len: 1 })
    );
  }

  #[test]
  fn sigmoid_is_clipped() {
    assert_eq!(sigmoid(1e9), sigmoid(100.0));
    assert!(sigmoid(-1e9) >= 0.0);
    assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
  }
}
