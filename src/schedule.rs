// 该文件是 Qingxu （情绪） 项目的一部分。
// src/schedule.rs - 帧节奏控制与取消令牌
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

use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
  #[error("处理间隔帧数必须大于 0")]
  ZeroInterval,
}

/// 每 N 帧放行一帧
#[derive(Debug, Clone)]
pub struct FrameScheduler {
  every_n: u32,
  counter: u32,
}

impl FrameScheduler {
  pub fn new(every_n: u32) -> Result<Self, ScheduleError> {
    if every_n == 0 {
      return Err(ScheduleError::ZeroInterval);
    }
    Ok(Self {
      every_n,
      counter: 0,
    })
  }

  /// 推进一帧，返回该帧是否需要处理
  pub fn tick(&mut self) -> bool {
    self.counter = (self.counter + 1) % self.every_n;
    self.counter == 0
  }

  pub fn reset(&mut self) {
    self.counter = 0;
  }
}

/// 可克隆的取消令牌，所有克隆共享同一状态
#[derive(Debug, Clone)]
pub struct CancelToken {
  sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelToken {
  pub fn new() -> Self {
    let (sender, _) = watch::channel(false);
    Self {
      sender: Arc::new(sender),
    }
  }

  pub fn cancel(&self) {
    self.sender.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.sender.borrow()
  }

  /// 等待取消。已取消时立即返回。
  pub async fn cancelled(&self) {
    let mut receiver = self.sender.subscribe();
    // 发送端由 self 持有，wait_for 不会因通道关闭而失败
    let _ = receiver.wait_for(|cancelled| *cancelled).await;
  }
}
