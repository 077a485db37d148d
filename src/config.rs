// 该文件是 CardScan （卡牌扫描） 项目的一部分。
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

use thiserror::Error;

use crate::{model::DEFAULT_DETECTION_THRESHOLD, schedule::DEFAULT_SKIP_INTERVAL};

pub const DEFAULT_DETECTOR_SIZE: usize = 416;
pub const DEFAULT_CLASSIFIER_SIZE: usize = 320;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("输入尺寸不能为 0: {0}")]
  ZeroSize(&'static str),
  #[error("置信度阈值必须在 0.0 - 1.0 之间: {0}")]
  ThresholdOutOfRange(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
  pub detector_size: usize,
  pub classifier_size: usize,
  pub threshold: f32,
  pub skip_interval: u64,
}

impl Default for ScanConfig {
  fn default() -> Self {
    Self {
      detector_size: DEFAULT_DETECTOR_SIZE,
      classifier_size: DEFAULT_CLASSIFIER_SIZE,
      threshold: DEFAULT_DETECTION_THRESHOLD,
      skip_interval: DEFAULT_SKIP_INTERVAL,
    }
  }
}

impl ScanConfig {
  pub fn with_detector_size(mut self, size: usize) -> Self {
    self.detector_size = size;
    self
  }

  pub fn with_classifier_size(mut self, size: usize) -> Self {
    self.classifier_size = size;
    self
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_skip_interval(mut self, interval: u64) -> Self {
    self.skip_interval = interval;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.detector_size == 0 {
      return Err(ConfigError::ZeroSize("detector"));
    }
    if self.classifier_size == 0 {
      return Err(ConfigError::ZeroSize("classifier"));
    }
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(ConfigError::ThresholdOutOfRange(self.threshold));
    }
    Ok(())
  }
}
