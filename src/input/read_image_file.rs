// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::InputFrame;
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbFrame},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("无效的重复次数: {0}")]
  InvalidRepeat(String),
}

/// 把一张静态图片当作相机帧反复输出
///
/// `image:///path/to/card.png?repeat=N`，缺省输出一次，`repeat=0` 表示无限重复。
pub struct ImageFileInput {
  image: Arc<RgbImage>,
  repeat: Option<u64>,
  emitted: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut repeat = Some(1);
    for (key, value) in url.query_pairs() {
      if key == "repeat" {
        let n: u64 = value
          .parse()
          .map_err(|_| ImageFileInputError::InvalidRepeat(value.to_string()))?;
        repeat = (n > 0).then_some(n);
      }
    }

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.into_rgb8();
    info!(
      "读取图像文件: {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    Ok(ImageFileInput::from_image(image).with_repeat(repeat))
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbImage) -> Self {
    Self {
      image: Arc::new(image),
      repeat: Some(1),
      emitted: 0,
    }
  }

  /// `None` 表示无限重复
  pub fn with_repeat(mut self, repeat: Option<u64>) -> Self {
    self.repeat = repeat;
    self
  }
}

impl Iterator for ImageFileInput {
  type Item = InputFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.repeat.is_some_and(|n| self.emitted >= n) {
      return None;
    }
    self.emitted += 1;
    Some(InputFrame::Image(self.image.clone()))
  }
}

pub(super) fn image_to_rgb(
  image: &RgbImage,
  width: usize,
  height: usize,
) -> Result<RgbFrame, FrameError> {
  if width == 0 || height == 0 {
    return Err(FrameError::InvalidShape { width, height });
  }

  let (src_width, src_height) = image.dimensions();
  if src_width as usize == width && src_height as usize == height {
    return RgbFrame::from_raw(width, height, image.as_raw().clone());
  }

  let resized = image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle);
  RgbFrame::from_raw(width, height, resized.into_raw())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::RawFrame;

  fn checker() -> RgbImage {
    RgbImage::from_fn(8, 6, |x, y| {
      if (x + y) % 2 == 0 {
        image::Rgb([255, 255, 255])
      } else {
        image::Rgb([0, 0, 0])
      }
    })
  }

  #[test]
  fn repeats_the_same_image() {
    let frames: Vec<InputFrame> = ImageFileInput::from_image(checker())
      .with_repeat(Some(3))
      .collect();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.width() == 8 && f.height() == 6));

    let mut endless = ImageFileInput::from_image(checker()).with_repeat(None);
    assert_eq!(endless.by_ref().take(100).count(), 100);
    assert!(endless.next().is_some());
  }

  #[test]
  fn converts_to_requested_size() {
    let image = checker();
    let same = image_to_rgb(&image, 8, 6).unwrap();
    assert_eq!(same.as_ref(), image.as_raw().as_slice());

    let resized = image_to_rgb(&image, 16, 16).unwrap();
    assert_eq!((resized.width(), resized.height()), (16, 16));
    assert_eq!(resized.as_ref().len(), 16 * 16 * 3);
    assert!(image_to_rgb(&image, 0, 16).is_err());
  }

  #[test]
  fn loads_image_from_url() {
    let path = std::env::temp_dir().join(format!("card-scan-input-{}.png", std::process::id()));
    checker().save(&path).unwrap();

    let url = Url::parse(&format!("image://{}?repeat=2", path.display())).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.count(), 2);

    let bad = Url::parse(&format!("image://{}?repeat=many", path.display())).unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&bad),
      Err(ImageFileInputError::InvalidRepeat(_))
    ));

    let _ = std::fs::remove_file(&path);
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let url = Url::parse("image:///nonexistent/card.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
