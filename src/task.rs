// 该文件是 Qingxu （情绪） 项目的一部分。
// src/task.rs - 任务驱动循环
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

use std::{future::Future, thread, time::Duration};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  input::FrameSource,
  model::InferenceBackend,
  output::PreviewSink,
  pipeline::{CycleOutcome, FrameReport, Pipeline, SkipReason},
  schedule::CancelToken,
};

pub trait Task<S, P, O>: Sized {
  type Error;
  fn run_task(
    self,
    source: S,
    pipeline: P,
    output: O,
  ) -> impl Future<Output = Result<TaskSummary, Self::Error>>;
}

/// 任务结束时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
  /// 取到的帧数
  pub ticks: u64,
  /// 实际运行检测流程的帧数
  pub processed: u64,
  pub detections: u64,
  pub failures: u64,
  pub cancelled: bool,
}

impl TaskSummary {
  fn record(&mut self, report: &FrameReport) {
    self.processed += 1;
    if report.detection.is_some() {
      self.detections += 1;
    }
    if report.outcome == CycleOutcome::ClassifierFailed {
      self.failures += 1;
    }
  }
}

/// 注册 Ctrl-C 处理：取消令牌，30 秒内未退出则强制结束进程
pub fn install_ctrlc(cancel: CancelToken) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    cancel.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}

fn render<O: PreviewSink>(output: &O, frame: &crate::frame::RgbFrame, report: &FrameReport)
where
  O::Error: std::error::Error,
{
  if let Err(e) = output.render_result(frame, report) {
    error!("第 {} 帧输出失败: {}", report.frame_index, e);
  }
}

/// 处理单帧，不经过帧调度器
pub struct OneShotTask;

impl<'a, S, B, O, const W: u32, const H: u32> Task<S, &'a mut Pipeline<B, W, H>, O> for OneShotTask
where
  S: FrameSource,
  B: InferenceBackend,
  O: PreviewSink,
  O::Error: std::error::Error,
{
  type Error = anyhow::Error;

  async fn run_task(
    self,
    mut source: S,
    pipeline: &'a mut Pipeline<B, W, H>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let frame = source
      .current_frame()
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let now = std::time::Instant::now();
    let report = pipeline.process_frame(&frame).await;
    info!("推理完成，耗时: {:.2?}, 结果 {:?}", now.elapsed(), report.outcome);

    let mut summary = TaskSummary {
      ticks: 1,
      ..TaskSummary::default()
    };
    if report.outcome == CycleOutcome::Cancelled {
      summary.cancelled = true;
    } else {
      summary.record(&report);
      render(&output, &frame, &report);
    }
    Ok(summary)
  }
}

/// 持续读取帧直到流结束、达到帧数上限或被取消
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<'a, S, B, O, const W: u32, const H: u32> Task<S, &'a mut Pipeline<B, W, H>, O>
  for ContinuousTask
where
  S: FrameSource,
  B: InferenceBackend,
  O: PreviewSink,
  O::Error: std::error::Error,
{
  type Error = anyhow::Error;

  async fn run_task(
    self,
    mut source: S,
    pipeline: &'a mut Pipeline<B, W, H>,
    output: O,
  ) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let cancel = pipeline.cancel_token().clone();
    let mut summary = TaskSummary::default();

    loop {
      if cancel.is_cancelled() {
        warn!("中断信号接收，退出任务循环");
        summary.cancelled = true;
        break;
      }

      if !source.is_ready() {
        tokio::task::yield_now().await;
        continue;
      }

      let Some(frame) = source.current_frame() else {
        info!("输入流结束");
        break;
      };
      summary.ticks += 1;

      let report = pipeline.on_frame(&frame).await;
      match report.outcome {
        CycleOutcome::Cancelled => {
          warn!("第 {} 帧处理被取消，退出任务循环", report.frame_index);
          summary.cancelled = true;
          break;
        }
        CycleOutcome::Skipped(SkipReason::NotAdmitted) => {}
        _ => {
          summary.record(&report);
          render(&output, &frame, &report);
        }
      }

      if self.frame_number.is_some_and(|n| summary.ticks >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.ticks);
        break;
      }
    }

    info!(
      "任务完成，退出: 共 {} 帧, 处理 {} 帧, 检测到人脸 {} 次, 分类失败 {} 次",
      summary.ticks, summary.processed, summary.detections, summary.failures
    );
    Ok(summary)
  }
}
