// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/model.rs - 模型
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

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde_json::Value;

use crate::tensor::Tensor;

/// 同步推理接口
///
/// 检测模型与分类模型均实现该接口。模型在流水线中只读共享，
/// 一次调用对应一个输入张量，返回有序的命名输出集合。
pub trait InferenceModel {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&self, input: &Tensor) -> Result<ModelOutputs, Self::Error>;
}

impl<M: InferenceModel + ?Sized> InferenceModel for Arc<M> {
  type Error = M::Error;

  fn run(&self, input: &Tensor) -> Result<ModelOutputs, Self::Error> {
    (**self).run(input)
  }
}

impl<M: InferenceModel + ?Sized> InferenceModel for Box<M> {
  type Error = M::Error;

  fn run(&self, input: &Tensor) -> Result<ModelOutputs, Self::Error> {
    (**self).run(input)
  }
}

/// 单个模型输出，可能是稠密序列，也可能是字符串键的稀疏映射
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTensor {
  Dense(Vec<f32>),
  Sparse(BTreeMap<String, f32>),
}

/// argmax 命中的类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassKey {
  Index(usize),
  Name(String),
}

impl std::fmt::Display for ClassKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ClassKey::Index(index) => write!(f, "{}", index),
      ClassKey::Name(name) => f.write_str(name),
    }
  }
}

fn coerce_scalar(value: &Value) -> Option<f32> {
  match value {
    Value::Number(n) => n.as_f64().map(|v| v as f32),
    Value::String(s) => s.trim().parse::<f32>().ok(),
    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
    _ => None,
  }
}

fn flatten_into(value: &Value, out: &mut Vec<f32>) {
  match value {
    Value::Array(items) => {
      for item in items {
        flatten_into(item, out);
      }
    }
    // 保留位置，无法解析的元素记为 NaN
    other => out.push(coerce_scalar(other).unwrap_or(f32::NAN)),
  }
}

impl OutputTensor {
  /// 从松散类型的 JSON 值构造输出
  ///
  /// 数字、数字字符串、布尔值都会被转换为 `f32`；数组（含嵌套数组）展平为稠密序列，
  /// 对象转换为稀疏映射，`null` 返回 `None`。
  pub fn from_json(value: &Value) -> Option<Self> {
    match value {
      Value::Null => None,
      Value::Array(_) => {
        let mut values = Vec::new();
        flatten_into(value, &mut values);
        Some(OutputTensor::Dense(values))
      }
      Value::Object(map) => Some(OutputTensor::Sparse(
        map
          .iter()
          .filter_map(|(k, v)| coerce_scalar(v).map(|v| (k.clone(), v)))
          .collect(),
      )),
      scalar => coerce_scalar(scalar).map(|v| OutputTensor::Dense(vec![v])),
    }
  }

  pub fn len(&self) -> usize {
    match self {
      OutputTensor::Dense(values) => values.len(),
      OutputTensor::Sparse(map) => map.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 按顺序展开所有取值；稀疏映射的键全部是下标时按下标排序
  pub fn values(&self) -> Vec<f32> {
    match self {
      OutputTensor::Dense(values) => values.clone(),
      OutputTensor::Sparse(map) => {
        let indexed: Option<Vec<(usize, f32)>> = map
          .iter()
          .map(|(k, &v)| k.parse::<usize>().ok().map(|i| (i, v)))
          .collect();
        match indexed {
          Some(mut pairs) => {
            pairs.sort_by_key(|&(i, _)| i);
            pairs.into_iter().map(|(_, v)| v).collect()
          }
          None => map.values().copied().collect(),
        }
      }
    }
  }

  /// 读取第 `index` 个值；稀疏映射先按 `name` 查找，再按下标字符串查找
  pub fn value_at(&self, index: usize, name: Option<&str>) -> Option<f32> {
    match self {
      OutputTensor::Dense(values) => values.get(index).copied(),
      OutputTensor::Sparse(map) => name
        .and_then(|name| map.get(name))
        .or_else(|| map.get(&index.to_string()))
        .copied(),
    }
  }

  /// 在任一形态上取最大值，NaN 被忽略，相等时保留先出现的项
  pub fn argmax(&self) -> Option<(ClassKey, f32)> {
    match self {
      OutputTensor::Dense(values) => values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
          Some((_, bv)) if bv >= v => best,
          _ => Some((i, v)),
        })
        .map(|(i, v)| (ClassKey::Index(i), v)),
      OutputTensor::Sparse(map) => map
        .iter()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(&String, f32)>, (k, &v)| match best {
          Some((_, bv)) if bv >= v => best,
          _ => Some((k, v)),
        })
        .map(|(k, v)| (ClassKey::Name(k.clone()), v)),
    }
  }
}

/// 一次推理调用的全部输出，保持模型给出的顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutputs {
  outputs: Vec<(String, OutputTensor)>,
}

impl ModelOutputs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, tensor: OutputTensor) -> Self {
    self.outputs.push((name.into(), tensor));
    self
  }

  pub fn push(&mut self, name: impl Into<String>, tensor: OutputTensor) {
    self.outputs.push((name.into(), tensor));
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }

  pub fn get(&self, name: &str) -> Option<&OutputTensor> {
    self
      .outputs
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, tensor)| tensor)
  }

  pub fn nth(&self, index: usize) -> Option<&OutputTensor> {
    self.outputs.get(index).map(|(_, tensor)| tensor)
  }

  /// 返回第一个名字在 `names` 中的输出的位置
  pub fn position_of(&self, names: &[&str]) -> Option<usize> {
    self
      .outputs
      .iter()
      .position(|(n, _)| names.iter().any(|candidate| n.eq_ignore_ascii_case(candidate)))
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputTensor)> {
    self.outputs.iter().map(|(n, t)| (n.as_str(), t))
  }
}

impl FromIterator<(String, OutputTensor)> for ModelOutputs {
  fn from_iter<I: IntoIterator<Item = (String, OutputTensor)>>(iter: I) -> Self {
    Self {
      outputs: iter.into_iter().collect(),
    }
  }
}

/// 检测框，坐标相对检测模型输入尺寸归一化
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub confidence: f32,
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
  pub card_id: String,
  pub confidence: f32,
}

/// 跨线程传递的单元：检测框及可选的识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCard {
  pub detection: Detection,
  pub classification: Option<Classification>,
}

impl DetectedCard {
  pub fn card_id(&self) -> Option<&str> {
    self.classification.as_ref().map(|c| c.card_id.as_str())
  }
}

/// 一帧的处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResult {
  pub frame_index: u64,
  pub cards: Vec<DetectedCard>,
  pub detection_time: Duration,
  pub classification_time: Duration,
}

impl FrameResult {
  pub fn empty(frame_index: u64) -> Self {
    Self {
      frame_index,
      ..Default::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.cards.is_empty()
  }

  /// 第一张已识别的卡牌
  pub fn first_classified(&self) -> Option<&DetectedCard> {
    self.cards.iter().find(|card| card.classification.is_some())
  }
}

mod classifier;
mod detector;
pub mod replay;

pub use self::classifier::ClassifierStage;
pub use self::detector::{DEFAULT_DETECTION_THRESHOLD, DetectorStage};
pub use self::replay::{ReplayModel, ReplayModelBuilder, ReplayModelError};
