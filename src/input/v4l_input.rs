// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::pin::Pin;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::InputFrame;
use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const MAX_CONSECUTIVE_FAILURES: usize = 30;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的参数 {0}: {1}")]
  InvalidParameter(String, String),
  #[error("设备不支持 YUYV 格式")]
  UnsupportedPixelFormat,
}

/// V4L2 摄像头输入
///
/// `v4l:///dev/video0?width=640&height=480`
///
/// Stream 需要引用 Device，Device 用 `Pin<Box>` 固定在堆上，
/// 两者存放在同一个结构体中，由 Drop 保证 stream 先于 device 释放。
pub struct V4lInput {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (key, value) in url.query_pairs() {
      let parse = |value: &str| {
        value
          .parse::<u32>()
          .ok()
          .filter(|v| *v > 0)
          .ok_or_else(|| V4lInputError::InvalidParameter(key.to_string(), value.to_string()))
      };
      match &*key {
        "width" => width = parse(&value)?,
        "height" => height = parse(&value)?,
        _ => {}
      }
    }

    let device_path = match url.path() {
      "" | "/" => DEFAULT_DEVICE,
      path => path,
    };
    Self::open(device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    let device = Box::pin(Device::with_path(device_path)?);

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedPixelFormat);
    }
    info!(
      "打开摄像头 {}: {}x{}",
      device_path, format.width, format.height
    );

    let mut input = Self {
      device,
      stream: None,
      width: format.width,
      height: format.height,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动，
    // stream 在 Drop 中先于 device 被释放
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)?
    };
    input.stream = Some(stream);
    Ok(input)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.stream.take();
  }
}

impl Iterator for V4lInput {
  type Item = InputFrame;

  /// 单帧捕获失败或数据损坏时跳过该帧；连续失败过多视为设备已断开
  fn next(&mut self) -> Option<Self::Item> {
    let (width, height) = (self.width as usize, self.height as usize);
    let stream = self.stream.as_mut()?;
    let frame = next_valid_frame(
      || {
        stream
          .next()
          .map(|(buffer, _meta)| frame_from_yuyv(buffer, width, height))
      },
      MAX_CONSECUTIVE_FAILURES,
    );
    if frame.is_none() {
      self.stream.take();
    }
    frame.map(InputFrame::Rgb)
  }
}

/// 重复捕获直到得到一帧有效图像，连续失败 `max_failures` 次后返回 `None`
fn next_valid_frame<E: std::fmt::Display>(
  mut capture: impl FnMut() -> Result<Option<RgbFrame>, E>,
  max_failures: usize,
) -> Option<RgbFrame> {
  let mut failures = 0;
  loop {
    match capture() {
      Ok(Some(frame)) => return Some(frame),
      Ok(None) => warn!("帧数据不完整, 已跳过"),
      Err(e) => warn!("无法捕获帧: {}", e),
    }
    failures += 1;
    if failures >= max_failures {
      error!("连续 {} 次捕获失败, 停止读取摄像头", failures);
      return None;
    }
  }
}

/// 缓冲区短于一帧 YUYV 数据时返回 `None`
fn frame_from_yuyv(buffer: &[u8], width: usize, height: usize) -> Option<RgbFrame> {
  if buffer.len() < width * height * 2 {
    return None;
  }
  RgbFrame::from_raw(width, height, yuyv_to_rgb(buffer, width, height)).ok()
}

/// YUYV (4:2:2) 转紧密排列的 RGB，多余的尾部字节被忽略
pub fn yuyv_to_rgb(yuyv: &[u8], width: usize, height: usize) -> Vec<u8> {
  let mut rgb = Vec::with_capacity(width * height * 3);

  for chunk in yuyv.chunks_exact(4).take(width * height / 2) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;

    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}
