// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/pipeline.rs - 逐帧检测识别流水线
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

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, debug_span, error, warn};

use crate::{
  config::ScanConfig,
  frame::{FrameError, RawFrame},
  model::{ClassifierStage, DetectedCard, DetectorStage, FrameResult, InferenceModel},
  region::extract_region,
  schedule::{FrameScheduler, ScanControl},
  tensor::{Tensor, TensorError},
};

type BoxedModelError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("帧数据错误: {0}")]
  Frame(#[from] FrameError),
  #[error("张量预处理错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("检测模型推理失败: {0}")]
  Detector(BoxedModelError),
  #[error("识别模型推理失败: {0}")]
  Classifier(BoxedModelError),
}

impl PipelineError {
  /// 输入缓冲区不符合约定，该帧不应进入推理
  pub fn is_contract_violation(&self) -> bool {
    matches!(self, PipelineError::Frame(_) | PipelineError::Tensor(_))
  }
}

pub struct CardPipeline<D, C> {
  detector: DetectorStage<D>,
  classifier: ClassifierStage<C>,
  scheduler: FrameScheduler,
  control: Arc<ScanControl>,
}

impl<D: InferenceModel, C: InferenceModel> CardPipeline<D, C> {
  pub fn new(detector: D, classifier: C, config: &ScanConfig) -> Self {
    Self {
      detector: DetectorStage::new(detector, config.detector_size),
      classifier: ClassifierStage::new(classifier, config.classifier_size),
      scheduler: FrameScheduler::new(config.skip_interval),
      control: ScanControl::new(true, config.threshold),
    }
  }

  /// 与界面线程共享扫描开关
  pub fn with_control(mut self, control: Arc<ScanControl>) -> Self {
    self.control = control;
    self
  }

  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.classifier = self.classifier.with_labels(labels);
    self
  }

  pub fn control(&self) -> Arc<ScanControl> {
    self.control.clone()
  }

  pub fn scheduler(&self) -> &FrameScheduler {
    &self.scheduler
  }

  /// 调度器接纳后处理该帧；未接纳或帧被丢弃时返回 `None`
  pub fn offer<F: RawFrame>(&mut self, frame: &F) -> Option<FrameResult> {
    let index = self.scheduler.admit(&self.control)?;
    self.process(frame, index)
  }

  /// 处理一帧，错误只影响本帧
  ///
  /// 输入不符合约定时记录日志并丢弃该帧；模型调用失败时返回空结果。
  pub fn process<F: RawFrame>(&self, frame: &F, index: u64) -> Option<FrameResult> {
    let span = debug_span!("frame", index);
    let _guard = span.enter();

    match self.try_process(frame, index) {
      Ok(result) => Some(result),
      Err(e) if e.is_contract_violation() => {
        error!("第 {} 帧输入无效, 已丢弃: {}", index, e);
        None
      }
      Err(e) => {
        warn!("第 {} 帧处理失败: {}", index, e);
        Some(FrameResult::empty(index))
      }
    }
  }

  pub fn try_process<F: RawFrame>(&self, frame: &F, index: u64) -> Result<FrameResult, PipelineError> {
    let size = self.detector.input_size();
    let started = Instant::now();

    let rgb = frame.to_rgb(size, size)?;
    let detections = {
      let tensor = Tensor::from_rgb(rgb.as_ref(), size, size)?;
      self
        .detector
        .detect(&tensor, self.control.threshold())
        .map_err(|e| PipelineError::Detector(Box::new(e)))?
    };
    let detection_time = started.elapsed();

    if detections.is_empty() {
      debug!("检测耗时: {:.2?}, 未检测到卡牌", detection_time);
      return Ok(FrameResult {
        frame_index: index,
        cards: Vec::new(),
        detection_time,
        classification_time: Duration::ZERO,
      });
    }

    let started = Instant::now();
    let classifier_size = self.classifier.input_size();
    let mut cards = Vec::with_capacity(detections.len());
    for detection in detections {
      let classification = match extract_region(&rgb, &detection, size, classifier_size) {
        Some(region) => {
          let tensor = Tensor::try_from(&region)?;
          self
            .classifier
            .classify(&tensor)
            .map_err(|e| PipelineError::Classifier(Box::new(e)))?
        }
        None => None,
      };
      cards.push(DetectedCard {
        detection,
        classification,
      });
    }
    let classification_time = started.elapsed();

    debug!(
      "检测耗时: {:.2?}, 识别耗时: {:.2?}, 卡牌数: {}",
      detection_time,
      classification_time,
      cards.len()
    );
    Ok(FrameResult {
      frame_index: index,
      cards,
      detection_time,
      classification_time,
    })
  }
}
