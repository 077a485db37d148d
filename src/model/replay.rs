// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/model/replay.rs - 回放模型
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

//! 以 JSON 文件描述的模型绑定
//!
//! 文件内容为若干组推理输出。默认每次调用按顺序循环返回其中一组，
//! 与输入无关；按输入选择模式（`replay:///path.json?mode=keyed`）下
//! 由输入张量内容决定返回哪一组，相同输入总得到相同输出：
//!
//! ```json
//! { "outputs": [
//!   { "confidence": 0.9, "boxes": [0.4, 0.4, 0.2, 0.2] },
//!   [["confidence", "0.3"], ["boxes", {"x": 0.1, "y": 0.1, "width": 0.5, "height": 0.5}]]
//! ] }
//! ```
//!
//! 对象形式的输出组按名字排序；需要保持顺序时使用 `[名字, 值]` 数组形式。
//! 顶层也可以直接是输出组数组。

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceModel, ModelOutputs, OutputTensor},
  tensor::Tensor,
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("第 {0} 组输出格式无效")]
  InvalidOutputSet(usize),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
  Wrapped { outputs: Vec<Value> },
  Bare(Vec<Value>),
}

fn parse_output_set(index: usize, value: &Value) -> Result<ModelOutputs, ReplayModelError> {
  let mut outputs = ModelOutputs::new();
  match value {
    Value::Object(map) => {
      for (name, v) in map {
        if let Some(tensor) = OutputTensor::from_json(v) {
          outputs.push(name.as_str(), tensor);
        }
      }
    }
    Value::Array(pairs) => {
      for pair in pairs {
        let (Some(name), Some(v)) = (pair.get(0).and_then(Value::as_str), pair.get(1)) else {
          return Err(ReplayModelError::InvalidOutputSet(index));
        };
        if let Some(tensor) = OutputTensor::from_json(v) {
          outputs.push(name, tensor);
        }
      }
    }
    _ => return Err(ReplayModelError::InvalidOutputSet(index)),
  }
  Ok(outputs)
}

/// 回放记录的模型输出
///
/// 循环模式下输出只取决于调用次数，作为识别模型时同一输入
/// 不保证得到同一结果；需要该性质时使用 `with_input_keyed(true)`。
pub struct ReplayModel {
  sets: Vec<ModelOutputs>,
  cursor: AtomicUsize,
  input_keyed: bool,
}

impl ReplayModel {
  pub fn from_sets(sets: Vec<ModelOutputs>) -> Self {
    Self {
      sets,
      cursor: AtomicUsize::new(0),
      input_keyed: false,
    }
  }

  /// 按输入张量内容选择输出组
  pub fn with_input_keyed(mut self, input_keyed: bool) -> Self {
    self.input_keyed = input_keyed;
    self
  }

  pub fn from_json_str(json: &str) -> Result<Self, ReplayModelError> {
    let values = match serde_json::from_str::<ReplayFile>(json)? {
      ReplayFile::Wrapped { outputs } => outputs,
      ReplayFile::Bare(outputs) => outputs,
    };

    let sets = values
      .iter()
      .enumerate()
      .map(|(i, v)| parse_output_set(i, v))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self::from_sets(sets))
  }

  pub fn len(&self) -> usize {
    self.sets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sets.is_empty()
  }
}

impl InferenceModel for ReplayModel {
  type Error = ReplayModelError;

  fn run(&self, input: &Tensor) -> Result<ModelOutputs, Self::Error> {
    if self.sets.is_empty() {
      return Ok(ModelOutputs::new());
    }
    let index = if self.input_keyed {
      (tensor_key(input) % self.sets.len() as u64) as usize
    } else {
      self.cursor.fetch_add(1, Ordering::Relaxed) % self.sets.len()
    };
    debug!("回放第 {} 组输出", index);
    Ok(self.sets[index].clone())
  }
}

/// FNV-1a 散列张量的形状与取值
fn tensor_key(tensor: &Tensor) -> u64 {
  const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
  const PRIME: u64 = 0x0000_0100_0000_01b3;

  let shape = [tensor.width() as u32, tensor.height() as u32];
  shape
    .into_iter()
    .chain(tensor.as_slice().iter().map(|v| v.to_bits()))
    .flat_map(u32::to_le_bytes)
    .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

pub struct ReplayModelBuilder {
  model_path: String,
  input_keyed: bool,
}

impl FromUrlWithScheme for ReplayModelBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModelBuilder {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut input_keyed = false;
    for (key, value) in url.query_pairs() {
      if key == "mode" {
        input_keyed = match &*value {
          "keyed" => true,
          "cycle" => false,
          other => {
            return Err(ReplayModelError::ModelPathError(format!(
              "未知的回放模式: {}",
              other
            )));
          }
        };
      }
    }

    Ok(ReplayModelBuilder {
      model_path: url.path().to_string(),
      input_keyed,
    })
  }
}

impl ReplayModelBuilder {
  pub fn build(self) -> Result<ReplayModel, ReplayModelError> {
    info!("加载模型文件: {}", self.model_path);
    let content = std::fs::read_to_string(&self.model_path)?;
    debug!("模型文件大小: {:.2} KB", content.len() as f64 / 1024.0);

    let model = ReplayModel::from_json_str(&content)?.with_input_keyed(self.input_keyed);
    info!("模型加载完成, 共 {} 组输出", model.len());
    Ok(model)
  }
}
