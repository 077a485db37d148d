// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidShape { width: usize, height: usize },
  #[error("帧转换失败: {0}")]
  Conversion(String),
}

/// 相机帧句柄
///
/// 帧由输入源持有，流水线在一次处理期间只读借用它，
/// 并通过 `to_rgb` 按需生成指定尺寸的 RGB 缓冲区。
pub trait RawFrame {
  fn width(&self) -> usize;
  fn height(&self) -> usize;
  fn to_rgb(&self, width: usize, height: usize) -> Result<RgbFrame, FrameError>;
}

/// 紧密排列的 HWC 格式 RGB 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  data: Box<[u8]>,
  width: usize,
  height: usize,
}

impl RgbFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * width * height;
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      width,
      height,
    }
  }

  pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width * height;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 像素 (x, y) 的三个通道，越界时返回 `None`
  pub fn get_pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    Some(self.pixel(x, y))
  }

  /// 调用方保证坐标在范围内
  pub(crate) fn pixel(&self, x: usize, y: usize) -> &[u8] {
    let offset = (y * self.width + x) * RGB_CHANNELS;
    &self.data[offset..offset + RGB_CHANNELS]
  }

  /// 最近邻缩放
  ///
  /// 目标像素 (x, y) 取源像素 (floor(x * src_w / dst_w), floor(y * src_h / dst_h))。
  /// 源帧为空时返回 `None`。
  pub fn resize_nearest(&self, width: usize, height: usize) -> Option<RgbFrame> {
    if self.width == 0 || self.height == 0 {
      return None;
    }

    let mut resized = RgbFrame::with_shape(height, width);
    let src_width = self.width;
    let src_height = self.height;
    let slice = resized.as_mut();

    for y in 0..height {
      let sy = (y * src_height / height).min(src_height - 1);
      for x in 0..width {
        let sx = (x * src_width / width).min(src_width - 1);
        let dst = (y * width + x) * RGB_CHANNELS;
        slice[dst..dst + RGB_CHANNELS].copy_from_slice(self.pixel(sx, sy));
      }
    }

    Some(resized)
  }
}

impl AsRef<[u8]> for RgbFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl RawFrame for RgbFrame {
  fn width(&self) -> usize {
    self.width
  }

  fn height(&self) -> usize {
    self.height
  }

  fn to_rgb(&self, width: usize, height: usize) -> Result<RgbFrame, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidShape { width, height });
    }
    if width == self.width && height == self.height {
      return Ok(self.clone());
    }
    self
      .resize_nearest(width, height)
      .ok_or(FrameError::InvalidShape {
        width: self.width,
        height: self.height,
      })
  }
}
