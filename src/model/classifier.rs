// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/model/classifier.rs - 卡牌识别阶段
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

use tracing::debug;

use crate::{
  model::{ClassKey, Classification, InferenceModel, ModelOutputs},
  tensor::Tensor,
};

const CLASS_OUTPUT_NAMES: [&str; 4] = ["classes", "probabilities", "scores", "logits"];

pub struct ClassifierStage<M> {
  model: M,
  input_size: usize,
  labels: Option<Arc<[String]>>,
}

impl<M: InferenceModel> ClassifierStage<M> {
  pub fn new(model: M, input_size: usize) -> Self {
    Self {
      model,
      input_size,
      labels: None,
    }
  }

  /// 稠密输出的下标映射到卡牌编号
  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = Some(labels.into());
    self
  }

  pub fn input_size(&self) -> usize {
    self.input_size
  }

  pub fn classify(&self, tensor: &Tensor) -> Result<Option<Classification>, M::Error> {
    debug!("执行识别模型推理");
    let outputs = self.model.run(tensor)?;
    Ok(self.postprocess(&outputs))
  }

  pub fn postprocess(&self, outputs: &ModelOutputs) -> Option<Classification> {
    let index = outputs.position_of(&CLASS_OUTPUT_NAMES).unwrap_or(0);
    let (key, confidence) = outputs.nth(index)?.argmax()?;

    let card_id = match (&key, &self.labels) {
      (ClassKey::Index(i), Some(labels)) => match labels.get(*i) {
        Some(label) => label.clone(),
        None => key.to_string(),
      },
      _ => key.to_string(),
    };

    debug!("识别结果: {} ({:.2}%)", card_id, confidence * 100.0);
    Some(Classification {
      card_id,
      confidence,
    })
  }
}
