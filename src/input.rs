// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/input.rs - 相机/图像输入
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

use crate::{
  FromUrl,
  frame::{FrameError, RawFrame, RgbFrame},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError, yuyv_to_rgb};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 输入错误: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("不支持的输入方案: {0}")]
  SchemeMismatch(String),
}

/// 输入源产生的帧
pub enum InputFrame {
  #[cfg(feature = "read_image_file")]
  Image(std::sync::Arc<image::RgbImage>),
  Rgb(RgbFrame),
}

impl RawFrame for InputFrame {
  fn width(&self) -> usize {
    match self {
      #[cfg(feature = "read_image_file")]
      InputFrame::Image(image) => image.width() as usize,
      InputFrame::Rgb(frame) => frame.width(),
    }
  }

  fn height(&self) -> usize {
    match self {
      #[cfg(feature = "read_image_file")]
      InputFrame::Image(image) => image.height() as usize,
      InputFrame::Rgb(frame) => frame.height(),
    }
  }

  fn to_rgb(&self, width: usize, height: usize) -> Result<RgbFrame, FrameError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputFrame::Image(image) => read_image_file::image_to_rgb(image, width, height),
      InputFrame::Rgb(frame) => frame.to_rgb(width, height),
    }
  }
}

impl From<RgbFrame> for InputFrame {
  fn from(frame: RgbFrame) -> Self {
    InputFrame::Rgb(frame)
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        let input = V4lInput::from_url(url)?;
        return Ok(InputWrapper::V4l(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Iterator for InputWrapper {
  type Item = InputFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.next(),
      #[cfg(not(any(feature = "read_image_file", feature = "v4l_input")))]
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera.local/stream").unwrap();
    match InputWrapper::from_url(&url) {
      Err(InputError::SchemeMismatch(scheme)) => assert_eq!(scheme, "rtsp"),
      _ => panic!("应当拒绝未知方案"),
    }
  }

  #[cfg(not(feature = "read_image_file"))]
  #[test]
  fn disabled_source_is_an_unknown_scheme() {
    let url = url::Url::parse("image:///tmp/card.png").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn rgb_frames_pass_through() {
    let frame = InputFrame::from(RgbFrame::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap());
    assert_eq!((frame.width(), frame.height()), (2, 1));
    assert_eq!(frame.to_rgb(2, 1).unwrap().as_ref(), &[1, 2, 3, 4, 5, 6]);
  }
}
