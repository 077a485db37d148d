// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/publish.rs - 跨线程结果发布
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

//! 处理线程与界面线程之间的单向交接
//!
//! 通道容量为 1。发布永不阻塞：若界面线程尚未取走上一帧结果，
//! 旧结果被新结果替换（只保证最新结果可见），并计入丢弃计数。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::debug;

use crate::model::FrameResult;

const RESULT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
  Delivered,
  /// 替换了一个尚未被取走的旧结果
  Coalesced,
  Disconnected,
}

#[derive(Debug, Default)]
struct Shared {
  dropped: AtomicU64,
  closed: AtomicBool,
}

pub struct ResultPublisher {
  tx: Sender<FrameResult>,
  stale: Receiver<FrameResult>,
  shared: Arc<Shared>,
}

pub struct ResultReceiver {
  rx: Receiver<FrameResult>,
  shared: Arc<Shared>,
}

pub fn result_channel() -> (ResultPublisher, ResultReceiver) {
  let (tx, rx) = crossbeam_channel::bounded(RESULT_CHANNEL_CAPACITY);
  let shared = Arc::new(Shared::default());
  (
    ResultPublisher {
      tx,
      stale: rx.clone(),
      shared: shared.clone(),
    },
    ResultReceiver { rx, shared },
  )
}

impl ResultPublisher {
  pub fn publish(&self, result: FrameResult) -> PublishOutcome {
    if self.shared.closed.load(Ordering::Acquire) {
      return PublishOutcome::Disconnected;
    }

    let result = match self.tx.try_send(result) {
      Ok(()) => return PublishOutcome::Delivered,
      Err(TrySendError::Disconnected(_)) => return PublishOutcome::Disconnected,
      Err(TrySendError::Full(result)) => result,
    };

    let evicted = match self.stale.try_recv() {
      Ok(old) => {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("界面线程未取走第 {} 帧结果, 以最新结果替换", old.frame_index);
        true
      }
      // 消费端恰好在此期间取走了旧结果
      Err(_) => false,
    };

    match self.tx.try_send(result) {
      Ok(()) if evicted => PublishOutcome::Coalesced,
      Ok(()) => PublishOutcome::Delivered,
      Err(TrySendError::Full(dropped)) => {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("通道仍然已满, 丢弃第 {} 帧结果", dropped.frame_index);
        PublishOutcome::Coalesced
      }
      Err(TrySendError::Disconnected(_)) => PublishOutcome::Disconnected,
    }
  }

  pub fn dropped(&self) -> u64 {
    self.shared.dropped.load(Ordering::Relaxed)
  }

  pub fn is_closed(&self) -> bool {
    self.shared.closed.load(Ordering::Acquire)
  }
}

impl ResultReceiver {
  /// 阻塞等待下一个结果；发布端已释放且通道为空时返回 `None`
  pub fn recv(&self) -> Option<FrameResult> {
    self.rx.recv().ok()
  }

  pub fn recv_timeout(&self, timeout: Duration) -> Result<FrameResult, RecvTimeoutError> {
    self.rx.recv_timeout(timeout)
  }

  pub fn try_recv(&self) -> Option<FrameResult> {
    self.rx.try_recv().ok()
  }

  /// 取走通道中所有结果，只返回最新的一个
  pub fn latest(&self) -> Option<FrameResult> {
    let mut latest = None;
    while let Ok(result) = self.rx.try_recv() {
      latest = Some(result);
    }
    latest
  }

  pub fn dropped(&self) -> u64 {
    self.shared.dropped.load(Ordering::Relaxed)
  }

  pub fn iter(&self) -> impl Iterator<Item = FrameResult> + '_ {
    self.rx.iter()
  }
}

impl Drop for ResultReceiver {
  fn drop(&mut self) {
    self.shared.closed.store(true, Ordering::Release);
  }
}
