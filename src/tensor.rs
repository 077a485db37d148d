// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/tensor.rs - 归一化输入张量
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

use crate::frame::{RGB_CHANNELS, RgbFrame};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量输入长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 模型输入张量，HWC 排列，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  data: Box<[f32]>,
  width: usize,
  height: usize,
}

impl Tensor {
  /// 将 RGB 字节缓冲区逐字节除以 255.0
  pub fn from_rgb(rgb: &[u8], width: usize, height: usize) -> Result<Self, TensorError> {
    let expected = width * height * RGB_CHANNELS;
    if rgb.len() != expected {
      return Err(TensorError::LengthMismatch {
        expected,
        actual: rgb.len(),
      });
    }

    let data = rgb.iter().map(|&v| v as f32 / 255.0).collect();
    Ok(Self {
      data,
      width,
      height,
    })
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

impl TryFrom<&RgbFrame> for Tensor {
  type Error = TensorError;

  fn try_from(frame: &RgbFrame) -> Result<Self, Self::Error> {
    Tensor::from_rgb(frame.as_ref(), frame.width(), frame.height())
  }
}
