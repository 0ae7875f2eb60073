// 该文件是 Qingxu （情绪） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use qingxu::{
  FromUrl,
  anchor::AnchorTable,
  config::PipelineConfig,
  input::InputWrapper,
  model::{ModelFile, TractBackend},
  output::OutputWrapper,
  pipeline::{Pipeline, PipelineBuilder},
  schedule::CancelToken,
  task::{ContinuousTask, Task, install_ctrlc},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("检测模型: {}", args.detector);
  info!("分类模型: {}", args.classifier);
  info!("锚框文件: {}", args.anchors);
  info!("输入来源: {}", args.input);
  info!("输出方式: {}", args.output);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::from_file(path)?,
    None => PipelineConfig::default(),
  };
  args.apply(&mut config);
  config.validate()?;

  let anchors = Arc::new(AnchorTable::from_url(&args.anchors)?);
  let detector = ModelFile::from_url(&args.detector)?;
  let classifier = ModelFile::from_url(&args.classifier)?;

  let cancel = CancelToken::new();
  install_ctrlc(cancel.clone())?;

  let mut pipeline: Pipeline<TractBackend> = PipelineBuilder::new(config)
    .cancel_token(cancel)
    .build(
      TractBackend::new(),
      detector.as_bytes(),
      classifier.as_bytes(),
      anchors,
    )?;

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, &mut pipeline, output)
    .await?;

  info!("统计: {}", serde_json::to_string(&summary)?);
  info!("最终情绪状态: {}", serde_json::to_string(pipeline.emotion_state())?);
  Ok(())
}
