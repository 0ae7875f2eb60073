// 该文件是 Qingxu （情绪） 项目的一部分。
// src/bin/oneshot.rs - 单张图像推理
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use qingxu::{
  FromUrl,
  anchor::AnchorTable,
  config::PipelineConfig,
  input::ImageFileInput,
  model::{ModelFile, TractBackend},
  output::OutputWrapper,
  pipeline::{Pipeline, PipelineBuilder},
  task::{OneShotTask, Task},
};

/// 对单张图像运行检测与情绪分类，并以 JSON 打印情绪状态
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 人脸检测模型
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 情绪分类模型
  #[arg(long, value_name = "MODEL")]
  pub classifier: Url,
  /// 锚框文件
  #[arg(long, value_name = "ANCHORS")]
  pub anchors: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型: {}", args.detector);
  info!("分类模型: {}", args.classifier);
  info!("输入来源: {}", args.input);

  let anchors = Arc::new(AnchorTable::from_url(&args.anchors)?);
  let detector = ModelFile::from_url(&args.detector)?;
  let classifier = ModelFile::from_url(&args.classifier)?;

  let mut pipeline: Pipeline<TractBackend> = PipelineBuilder::new(PipelineConfig::default())
    .build(
      TractBackend::new(),
      detector.as_bytes(),
      classifier.as_bytes(),
      anchors,
    )?;

  let input = ImageFileInput::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, &mut pipeline, output).await?;

  println!("{}", serde_json::to_string_pretty(pipeline.emotion_state())?);
  Ok(())
}
