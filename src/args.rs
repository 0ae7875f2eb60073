// 该文件是 Qingxu （情绪） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use qingxu::config::PipelineConfig;

/// Qingxu 人脸检测与情绪平滑
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 人脸检测模型，例如 onnx:///models/face_detection_front.onnx
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,

  /// 情绪分类模型，例如 onnx:///models/emotion.onnx
  #[arg(long, value_name = "MODEL")]
  pub classifier: Url,

  /// 锚框文件，例如 anchors:///models/anchors.csv?count=896
  #[arg(long, value_name = "ANCHORS")]
  pub anchors: Url,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/face.png?repeat=30
  /// - 目录: folder:///path/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出方式
  /// 支持格式:
  /// - 日志: log:
  /// - 记录: jsonl:///path/report.jsonl
  /// - 图片: image:///path/preview-{frame}.png
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,

  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 每 N 帧处理一帧
  #[arg(long, value_name = "N")]
  pub every_n_frames: Option<u32>,

  /// 平滑等级 (0 - 29)
  #[arg(long, value_name = "GRADE")]
  pub smoothing: Option<u8>,

  /// 检测置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 最大读取帧数，缺省时直到输入结束
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<u64>,
}

impl Args {
  /// 命令行参数覆盖配置文件中的同名字段
  pub fn apply(&self, config: &mut PipelineConfig) {
    if let Some(n) = self.every_n_frames {
      config.emotion.every_n_frames = n;
    }
    if let Some(grade) = self.smoothing {
      config.emotion.smoothing = grade;
    }
    if let Some(threshold) = self.confidence {
      config.detector.nms.score_threshold = threshold;
    }
  }
}
