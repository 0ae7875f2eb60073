// 该文件是 Qingxu （情绪） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  anchor::DEFAULT_NUM_ANCHORS,
  emotion::{Emotion, MAX_SMOOTHING},
  nms::NmsConfig,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 检测器输出张量的组织方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorLayout {
  /// 输出 0 为 `[1, N, 4+2K]` 回归量，输出 1 为 `[1, N, 1]` 分数，由本库执行 NMS
  Raw,
  /// 模型内已完成 NMS：输出 0 为锚框索引，输出 1 为分数，输出 2 为回归量
  Filtered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  /// 正方形模型输入边长
  pub input_size: u32,
  pub num_anchors: usize,
  pub num_keypoints: usize,
  pub layout: DetectorLayout,
  /// 原始分数是否为 logit（需要 sigmoid）
  pub scores_are_logits: bool,
  pub nms: NmsConfig,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_size: 128,
      num_anchors: DEFAULT_NUM_ANCHORS,
      num_keypoints: 6,
      layout: DetectorLayout::Raw,
      scores_are_logits: true,
      nms: NmsConfig::detector(),
    }
  }
}

/// 分类器输入通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropChannels {
  Luma,
  Rgb,
}

impl CropChannels {
  pub fn count(&self) -> usize {
    match self {
      CropChannels::Luma => 1,
      CropChannels::Rgb => 3,
    }
  }
}

/// 分类器输入的数值归一化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
  /// `v / 255`
  Linear,
  /// `(v - 127) / 128`
  LinearNormalized,
}

impl ValueType {
  pub fn normalize(&self, value: f32) -> f32 {
    match self {
      ValueType::Linear => value / 255.0,
      ValueType::LinearNormalized => (value - 127.0) / 128.0,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
  /// 裁剪窗口相对于检测框半宽高的倍数
  pub scale_factor: f32,
  pub channels: CropChannels,
  pub value_type: ValueType,
}

impl Default for CropConfig {
  fn default() -> Self {
    Self {
      scale_factor: 2.0,
      channels: CropChannels::Luma,
      value_type: ValueType::Linear,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
  /// 每 N 帧处理一帧
  pub every_n_frames: u32,
  /// 平滑等级 `0..=29`
  pub smoothing: u8,
  pub filter_all_zeros: bool,
  /// 分类器输出下标到情绪标签的映射
  pub labels: Vec<Emotion>,
  /// 手动情绪数值（测试模式）。设置后分类器输出被忽略
  pub manual: Option<HashMap<Emotion, f32>>,
}

impl Default for EmotionConfig {
  fn default() -> Self {
    Self {
      every_n_frames: 15,
      smoothing: 0,
      filter_all_zeros: true,
      labels: vec![Emotion::Neutral, Emotion::Surprised, Emotion::Sad],
      manual: None,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub detector: DetectorConfig,
  pub crop: CropConfig,
  pub emotion: EmotionConfig,
}

impl PipelineConfig {
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let d = &self.detector;
    if d.input_size == 0 {
      return Err(ConfigError::Invalid("检测器输入尺寸必须大于 0".into()));
    }
    if d.num_anchors == 0 {
      return Err(ConfigError::Invalid("锚框数量必须大于 0".into()));
    }
    if !(0.0..=1.0).contains(&d.nms.score_threshold) {
      return Err(ConfigError::Invalid(format!(
        "置信度阈值 {} 不在 [0, 1] 范围内",
        d.nms.score_threshold
      )));
    }
    if !(0.0..=1.0).contains(&d.nms.iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "IoU 阈值 {} 不在 [0, 1] 范围内",
        d.nms.iou_threshold
      )));
    }
    if d.nms.top_k == Some(0) {
      return Err(ConfigError::Invalid("top_k 必须大于 0".into()));
    }

    let c = &self.crop;
    if !c.scale_factor.is_finite() || c.scale_factor <= 0.0 {
      return Err(ConfigError::Invalid(format!(
        "裁剪缩放系数 {} 必须为正数",
        c.scale_factor
      )));
    }

    let e = &self.emotion;
    if e.every_n_frames == 0 {
      return Err(ConfigError::Invalid("处理间隔帧数必须大于 0".into()));
    }
    if e.smoothing > MAX_SMOOTHING {
      return Err(ConfigError::Invalid(format!(
        "平滑等级 {} 超过上限 {}",
        e.smoothing, MAX_SMOOTHING
      )));
    }
    if e.labels.is_empty() {
      return Err(ConfigError::Invalid("情绪标签列表不能为空".into()));
    }
    if let Some((emotion, value)) = e
      .manual
      .iter()
      .flatten()
      .find(|(_, v)| !(0.0..=1.0).contains(*v))
    {
      return Err(ConfigError::Invalid(format!(
        "手动情绪 {} 的数值 {} 不在 [0, 1] 范围内",
        emotion, value
      )));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = PipelineConfig::default();
    config.validate().unwrap();
    assert_eq!(config.detector.input_size, 128);
    assert_eq!(config.emotion.every_n_frames, 15);
    assert_eq!(config.crop.scale_factor, 2.0);
  }

  #[test]
  fn rejects_out_of_range_values() {
    let mut config = PipelineConfig::default();
    config.emotion.every_n_frames = 0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.emotion.smoothing = 30;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.detector.nms.iou_threshold = 1.5;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.crop.scale_factor = 0.0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.emotion.manual = Some(HashMap::from([(Emotion::Sad, 1.2)]));
    assert!(config.validate().is_err());
  }

  #[test]
  fn manual_emotions_parse_by_label() {
    let json = r#"{ "emotion": { "manual": { "Happy": 0.8, "Neutral": 0.1 } } }"#;
    let config: PipelineConfig = serde_json::from_str(json).unwrap();
    let manual = config.emotion.manual.as_ref().unwrap();
    assert_eq!(manual.get(&Emotion::Happy), Some(&0.8));
    assert_eq!(manual.get(&Emotion::Neutral), Some(&0.1));
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_json_falls_back_to_defaults() {
    let json = r#"{ "emotion": { "smoothing": 12, "labels": ["Happy", "Sad"] } }"#;
    let config: PipelineConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.emotion.smoothing, 12);
    assert_eq!(config.emotion.every_n_frames, 15);
    assert_eq!(config.emotion.labels, vec![Emotion::Happy, Emotion::Sad]);
    assert_eq!(config.detector.layout, DetectorLayout::Raw);
  }

  #[test]
  fn value_types_normalize() {
    assert_eq!(ValueType::Linear.normalize(255.0), 1.0);
    assert_eq!(ValueType::LinearNormalized.normalize(255.0), 1.0);
    assert_eq!(ValueType::LinearNormalized.normalize(127.0), 0.0);
  }
}
