// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/region.rs - 检测区域裁剪
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

use tracing::debug;

use crate::{
  frame::{RGB_CHANNELS, RgbFrame},
  model::Detection,
};

/// 检测模型输入尺寸下的像素框，可能越界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub x: i64,
  pub y: i64,
  pub width: i64,
  pub height: i64,
}

/// 裁剪到源缓冲区范围内的像素框，`[x0, x1) × [y0, y1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedBox {
  pub x0: usize,
  pub y0: usize,
  pub x1: usize,
  pub y1: usize,
}

impl ClampedBox {
  pub fn width(&self) -> usize {
    self.x1 - self.x0
  }

  pub fn height(&self) -> usize {
    self.y1 - self.y0
  }

  pub fn is_empty(&self) -> bool {
    self.width() == 0 || self.height() == 0
  }
}

pub fn pixel_box(detection: &Detection, size: usize) -> PixelBox {
  let scale = size as f32;
  PixelBox {
    x: (detection.x * scale).floor() as i64,
    y: (detection.y * scale).floor() as i64,
    width: (detection.width * scale).floor() as i64,
    height: (detection.height * scale).floor() as i64,
  }
}

/// 起点与终点分别裁剪到 `[0, width] × [0, height]`
pub fn clamp_box(bbox: PixelBox, width: usize, height: usize) -> ClampedBox {
  let (w, h) = (width as i64, height as i64);
  let x0 = bbox.x.clamp(0, w);
  let y0 = bbox.y.clamp(0, h);
  let x1 = bbox.x.saturating_add(bbox.width).clamp(0, w).max(x0);
  let y1 = bbox.y.saturating_add(bbox.height).clamp(0, h).max(y0);

  ClampedBox {
    x0: x0 as usize,
    y0: y0 as usize,
    x1: x1 as usize,
    y1: y1 as usize,
  }
}

/// 按行复制裁剪区域到紧密排列的新缓冲区
pub fn crop(src: &RgbFrame, bbox: ClampedBox) -> RgbFrame {
  let mut cropped = RgbFrame::with_shape(bbox.height(), bbox.width());
  let row_len = bbox.width() * RGB_CHANNELS;
  let src_stride = src.width() * RGB_CHANNELS;
  let source = src.as_ref();
  let target = cropped.as_mut();

  for (row, y) in (bbox.y0..bbox.y1).enumerate() {
    let start = y * src_stride + bbox.x0 * RGB_CHANNELS;
    target[row * row_len..(row + 1) * row_len].copy_from_slice(&source[start..start + row_len]);
  }

  cropped
}

/// 从检测输入缓冲区中取出检测框对应区域，并缩放到识别模型输入尺寸
///
/// 框被裁剪成零宽或零高时返回 `None`，调用方应跳过识别。
pub fn extract_region(
  src: &RgbFrame,
  detection: &Detection,
  detector_size: usize,
  classifier_size: usize,
) -> Option<RgbFrame> {
  let bbox = clamp_box(pixel_box(detection, detector_size), src.width(), src.height());
  if bbox.is_empty() {
    debug!("检测框裁剪后为空: {:?}", bbox);
    return None;
  }

  debug!(
    "裁剪区域 ({}, {})-({}, {}), {}x{} -> {}x{}",
    bbox.x0,
    bbox.y0,
    bbox.x1,
    bbox.y1,
    bbox.width(),
    bbox.height(),
    classifier_size,
    classifier_size
  );
  crop(src, bbox).resize_nearest(classifier_size, classifier_size)
}
