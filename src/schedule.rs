// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/schedule.rs - 帧调度与扫描开关
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use tracing::{debug, info, warn};

use crate::model::DEFAULT_DETECTION_THRESHOLD;

/// 默认每 30 帧处理一帧，常见帧率下约每秒一次
pub const DEFAULT_SKIP_INTERVAL: u64 = 30;

/// 可由界面线程随时修改的扫描控制项
#[derive(Debug)]
pub struct ScanControl {
  enabled: AtomicBool,
  threshold_bits: AtomicU32,
  generation: AtomicU64,
}

impl ScanControl {
  pub fn new(enabled: bool, threshold: f32) -> Arc<Self> {
    Arc::new(Self {
      enabled: AtomicBool::new(enabled),
      threshold_bits: AtomicU32::new(
        sanitize_threshold(threshold)
          .unwrap_or(DEFAULT_DETECTION_THRESHOLD)
          .to_bits(),
      ),
      generation: AtomicU64::new(0),
    })
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::Acquire)
  }

  /// 从关闭切换到开启时递增开启代数，调度器据此重置帧计数
  pub fn set_enabled(&self, enabled: bool) {
    let previous = self.enabled.swap(enabled, Ordering::AcqRel);
    if enabled && !previous {
      self.generation.fetch_add(1, Ordering::AcqRel);
      info!("扫描已开启");
    } else if !enabled && previous {
      info!("扫描已关闭");
    }
  }

  pub fn threshold(&self) -> f32 {
    f32::from_bits(self.threshold_bits.load(Ordering::Relaxed))
  }

  /// 阈值被限制在 [0, 1]；NaN 被忽略，保留原阈值
  pub fn set_threshold(&self, threshold: f32) {
    match sanitize_threshold(threshold) {
      Some(threshold) => self
        .threshold_bits
        .store(threshold.to_bits(), Ordering::Relaxed),
      None => warn!("忽略无效的置信度阈值: {}", threshold),
    }
  }

  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::Acquire)
  }
}

fn sanitize_threshold(threshold: f32) -> Option<f32> {
  (!threshold.is_nan()).then(|| threshold.clamp(0.0, 1.0))
}

/// 帧节流
///
/// 每收到一帧计数器加一，无论是否处理；仅当扫描开启且计数器整除间隔时处理。
#[derive(Debug)]
pub struct FrameScheduler {
  interval: u64,
  counter: u64,
  was_enabled: bool,
  generation: u64,
}

impl FrameScheduler {
  pub fn new(interval: u64) -> Self {
    Self {
      interval: interval.max(1),
      counter: 0,
      was_enabled: false,
      generation: 0,
    }
  }

  pub fn interval(&self) -> u64 {
    self.interval
  }

  pub fn counter(&self) -> u64 {
    self.counter
  }

  pub fn reset(&mut self) {
    self.counter = 0;
  }

  pub fn should_process(&mut self, enabled: bool) -> bool {
    if enabled && !self.was_enabled {
      self.reset();
    }
    self.was_enabled = enabled;

    let process = enabled && self.counter % self.interval == 0;
    self.counter = self.counter.wrapping_add(1);
    process
  }

  /// 读取共享开关，决定当前帧是否进入流水线；返回被接纳帧的计数值
  pub fn admit(&mut self, control: &ScanControl) -> Option<u64> {
    let generation = control.generation();
    if generation != self.generation {
      // 两帧之间发生过关闭再开启
      self.generation = generation;
      self.was_enabled = false;
    }

    if self.should_process(control.is_enabled()) {
      let counter = self.counter.wrapping_sub(1);
      debug!("接纳第 {} 帧", counter);
      Some(counter)
    } else {
      None
    }
  }
}

impl Default for FrameScheduler {
  fn default() -> Self {
    Self::new(DEFAULT_SKIP_INTERVAL)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn processes_one_in_every_interval() {
    let mut scheduler = FrameScheduler::new(30);
    let decisions: Vec<bool> = (0..300).map(|_| scheduler.should_process(true)).collect();
    assert_eq!(decisions.iter().filter(|&&p| p).count(), 10);
    for window in decisions.windows(30) {
      assert_eq!(window.iter().filter(|&&p| p).count(), 1);
    }
    assert!(decisions[0]);
    assert!(decisions[30]);
    assert!(!decisions[29]);
  }

  #[test]
  fn disabled_frames_still_advance_the_counter() {
    let mut scheduler = FrameScheduler::new(5);
    scheduler.should_process(true);
    scheduler.should_process(true);
    // 计数器已为 2；保持开启时下一次处理在计数 5
    let later: Vec<bool> = (0..4).map(|_| scheduler.should_process(true)).collect();
    assert_eq!(later, vec![false, false, false, true]);
    assert_eq!(scheduler.counter(), 6);
    assert!(!scheduler.should_process(false));
    assert_eq!(scheduler.counter(), 7);
  }

  #[test]
  fn re_enabling_resets_the_counter() {
    let mut scheduler = FrameScheduler::new(30);
    for _ in 0..7 {
      scheduler.should_process(true);
    }
    assert!(!scheduler.should_process(false));
    // 重新开启后立即处理，而不是等到计数 30
    assert!(scheduler.should_process(true));
    assert!(!scheduler.should_process(true));
  }

  #[test]
  fn zero_interval_processes_every_frame() {
    let mut scheduler = FrameScheduler::new(0);
    assert!((0..5).all(|_| scheduler.should_process(true)));
  }

  #[test]
  fn admit_follows_shared_control() {
    let control = ScanControl::new(false, 0.75);
    let mut scheduler = FrameScheduler::new(3);
    assert_eq!(scheduler.admit(&control), None);

    control.set_enabled(true);
    assert_eq!(scheduler.admit(&control), Some(0));
    assert_eq!(scheduler.admit(&control), None);

    // 两帧之间关闭又开启，调度器仍会重置
    control.set_enabled(false);
    control.set_enabled(true);
    assert_eq!(scheduler.admit(&control), Some(0));
  }

  #[test]
  fn threshold_is_clamped() {
    let control = ScanControl::new(true, 0.75);
    assert_eq!(control.threshold(), 0.75);
    control.set_threshold(1.5);
    assert_eq!(control.threshold(), 1.0);
    control.set_threshold(-0.2);
    assert_eq!(control.threshold(), 0.0);
  }

  #[test]
  fn nan_threshold_is_ignored() {
    let control = ScanControl::new(true, 0.6);
    control.set_threshold(f32::NAN);
    assert_eq!(control.threshold(), 0.6);

    let control = ScanControl::new(true, f32::NAN);
    assert_eq!(control.threshold(), DEFAULT_DETECTION_THRESHOLD);
    let control = ScanControl::new(true, f32::INFINITY);
    assert_eq!(control.threshold(), 1.0);
  }
}
