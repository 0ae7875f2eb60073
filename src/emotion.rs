// 该文件是 Qingxu （情绪） 项目的一部分。
// src/emotion.rs - 情绪向量与时间平滑
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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize, ser::SerializeMap};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::EmotionConfig;

/// 平滑等级的刻度：等级 `g` 表示保留 `g / 30` 的旧值
pub const SMOOTHING_SCALE: f32 = 30.0;
pub const MAX_SMOOTHING: u8 = 29;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmotionError {
  #[error("未知的情绪标签: {0}")]
  UnknownLabel(String),
  #[error("平滑等级 {0} 超过上限 {MAX_SMOOTHING}")]
  SmoothingOutOfRange(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emotion {
  Angry,
  Disgusted,
  Scared,
  Happy,
  Sad,
  Surprised,
  Neutral,
}

impl Emotion {
  pub const ALL: [Emotion; 7] = [
    Emotion::Angry,
    Emotion::Disgusted,
    Emotion::Scared,
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Surprised,
    Emotion::Neutral,
  ];

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn label(self) -> &'static str {
    match self {
      Emotion::Angry => "Angry",
      Emotion::Disgusted => "Disgusted",
      Emotion::Scared => "Scared",
      Emotion::Happy => "Happy",
      Emotion::Sad => "Sad",
      Emotion::Surprised => "Surprised",
      Emotion::Neutral => "Neutral",
    }
  }
}

impl fmt::Display for Emotion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Emotion {
  type Err = EmotionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Emotion::ALL
      .into_iter()
      .find(|e| e.label().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| EmotionError::UnknownLabel(s.to_string()))
  }
}

/// 每个情绪标签的概率，取值 `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmotionVector {
  values: [f32; 7],
}

impl EmotionVector {
  pub fn get(&self, emotion: Emotion) -> f32 {
    self.values[emotion.index()]
  }

  /// 写入单个标签，非有限值按 0 处理，其余截断到 `[0, 1]`
  pub fn set(&mut self, emotion: Emotion, value: f32) {
    self.values[emotion.index()] = if value.is_finite() {
      value.clamp(0.0, 1.0)
    } else {
      0.0
    };
  }

  pub fn with(mut self, emotion: Emotion, value: f32) -> Self {
    self.set(emotion, value);
    self
  }

  pub fn is_all_zero(&self) -> bool {
    self.values.iter().all(|v| *v == 0.0)
  }

  pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
    Emotion::ALL.into_iter().map(|e| (e, self.get(e)))
  }

  /// 按标签映射读取分类器输出：第 `i` 个输出对应 `labels[i]`，多余的输出被忽略
  pub fn from_classifier(outputs: &[f32], labels: &[Emotion]) -> Self {
    let mut vector = Self::default();
    for (value, emotion) in outputs.iter().zip(labels) {
      vector.set(*emotion, *value);
    }
    vector
  }

  /// `smoothed = smoothed * (g/30) + raw * ((30 - g)/30)`
  pub fn blend(&mut self, raw: &EmotionVector, grade: u8) {
    let keep = grade as f32 / SMOOTHING_SCALE;
    let take = (SMOOTHING_SCALE - grade as f32) / SMOOTHING_SCALE;
    for (smoothed, fresh) in self.values.iter_mut().zip(raw.values.iter()) {
      *smoothed = *smoothed * keep + *fresh * take;
    }
  }

  /// 综合情绪指数 `clamp01((surprised*3 + neutral*2 - sad*2 + 1) / 3)`
  pub fn emotion_index(&self) -> f32 {
    let surprised = self.get(Emotion::Surprised);
    let neutral = self.get(Emotion::Neutral);
    let sad = self.get(Emotion::Sad);
    ((surprised * 3.0 + neutral * 2.0 - sad * 2.0 + 1.0) / 3.0).clamp(0.0, 1.0)
  }
}

impl Serialize for EmotionVector {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(Emotion::ALL.len()))?;
    for (emotion, value) in self.iter() {
      map.serialize_entry(emotion.label(), &value)?;
    }
    map.end()
  }
}

/// 对外发布的情绪状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionState {
  pub emotions: EmotionVector,
  /// 最近一次分类失败且尚未被成功更新覆盖
  pub error: bool,
  /// 已接受的更新次数
  pub updates: u64,
  pub emotion_index: f32,
}

impl Default for EmotionState {
  fn default() -> Self {
    let emotions = EmotionVector::default();
    Self {
      emotion_index: emotions.emotion_index(),
      emotions,
      error: false,
      updates: 0,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
  Applied,
  /// 全零输入被视为传感器掉线，状态保持不变
  FilteredZero,
  /// 手动覆盖模式下忽略分类器输出
  Overridden,
}

/// 情绪平滑器。唯一的写入者；读取者通过 [`EmotionSmoother::subscribe`] 获取快照。
#[derive(Debug)]
pub struct EmotionSmoother {
  smoothing: u8,
  filter_all_zeros: bool,
  state: EmotionState,
  manual: Option<EmotionVector>,
  publisher: watch::Sender<EmotionState>,
}

impl EmotionSmoother {
  pub fn new(smoothing: u8, filter_all_zeros: bool) -> Result<Self, EmotionError> {
    if smoothing > MAX_SMOOTHING {
      return Err(EmotionError::SmoothingOutOfRange(smoothing));
    }

    let state = EmotionState::default();
    let (publisher, _) = watch::channel(state.clone());
    Ok(Self {
      smoothing,
      filter_all_zeros,
      state,
      manual: None,
      publisher,
    })
  }

  pub fn from_config(config: &EmotionConfig) -> Result<Self, EmotionError> {
    let mut smoother = Self::new(config.smoothing, config.filter_all_zeros)?;
    if let Some(manual) = &config.manual {
      let values = manual
        .iter()
        .fold(EmotionVector::default(), |v, (emotion, value)| v.with(*emotion, *value));
      smoother.set_override(values);
    }
    Ok(smoother)
  }

  pub fn state(&self) -> &EmotionState {
    &self.state
  }

  pub fn subscribe(&self) -> watch::Receiver<EmotionState> {
    self.publisher.subscribe()
  }

  pub fn update(&mut self, raw: &EmotionVector) -> UpdateOutcome {
    if self.manual.is_some() {
      return UpdateOutcome::Overridden;
    }

    if self.filter_all_zeros && raw.is_all_zero() {
      debug!("情绪全为零，跳过本帧");
      return UpdateOutcome::FilteredZero;
    }

    self.state.emotions.blend(raw, self.smoothing);
    self.state.error = false;
    self.state.updates += 1;
    self.publish();
    UpdateOutcome::Applied
  }

  /// 分类失败：保留已有数值，仅设置错误标志
  pub fn mark_failure(&mut self) {
    if !self.state.error {
      error!("情绪分类失败，设置错误标志");
    }
    self.state.error = true;
    self.publish();
  }

  /// 手动指定情绪数值（测试模式），直到 [`EmotionSmoother::clear_override`]
  pub fn set_override(&mut self, values: EmotionVector) {
    warn!("进入手动情绪模式");
    self.manual = Some(values);
    self.state.emotions = values;
    self.state.error = false;
    self.publish();
  }

  pub fn clear_override(&mut self) {
    if self.manual.take().is_some() {
      warn!("退出手动情绪模式");
    }
  }

  pub fn is_overridden(&self) -> bool {
    self.manual.is_some()
  }

  fn publish(&mut self) {
    self.state.emotion_index = self.state.emotions.emotion_index();
    self.publisher.send_replace(self.state.clone());
  }
}
