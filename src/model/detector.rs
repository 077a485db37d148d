// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/model/detector.rs - 卡牌检测阶段
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
  model::{Detection, InferenceModel, ModelOutputs},
  tensor::Tensor,
};

pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.75;

const DETECTOR_NUM_OUTPUTS: usize = 2;
const SCORE_OUTPUT_NAMES: [&str; 4] = ["confidence", "confidences", "scores", "score"];
const BOX_OUTPUT_NAMES: [&str; 4] = ["boxes", "box", "bbox", "coordinates"];
const BOX_FIELD_NAMES: [&str; 4] = ["x", "y", "width", "height"];

pub struct DetectorStage<M> {
  model: M,
  input_size: usize,
}

impl<M: InferenceModel> DetectorStage<M> {
  pub fn new(model: M, input_size: usize) -> Self {
    Self { model, input_size }
  }

  /// 检测模型输入边长（像素）
  pub fn input_size(&self) -> usize {
    self.input_size
  }

  pub fn detect(&self, tensor: &Tensor, threshold: f32) -> Result<Vec<Detection>, M::Error> {
    debug!("执行检测模型推理");
    let outputs = self.model.run(tensor)?;
    Ok(Self::postprocess(&outputs, threshold))
  }

  /// 从模型输出中提取置信度不低于阈值的检测框
  ///
  /// 置信度输出可以是单个标量，也可以是若干候选；第 i 个候选对应框输出中
  /// 第 `4i..4i+4` 个值。输出数量不足或阈值为 NaN 时返回空列表，
  /// 负阈值按 0 处理。
  pub fn postprocess(outputs: &ModelOutputs, threshold: f32) -> Vec<Detection> {
    if outputs.len() < DETECTOR_NUM_OUTPUTS {
      debug!(
        "检测模型输出数量不足: 期望 {}, 实际 {}",
        DETECTOR_NUM_OUTPUTS,
        outputs.len()
      );
      return Vec::new();
    }

    if threshold.is_nan() {
      debug!("置信度阈值无效, 丢弃全部候选");
      return Vec::new();
    }
    let threshold = threshold.max(0.0);

    let score_idx = outputs.position_of(&SCORE_OUTPUT_NAMES).unwrap_or(0);
    let box_idx = outputs
      .position_of(&BOX_OUTPUT_NAMES)
      .filter(|&idx| idx != score_idx)
      .unwrap_or(if score_idx == 0 { 1 } else { 0 });

    let (Some(scores), Some(boxes)) = (outputs.nth(score_idx), outputs.nth(box_idx)) else {
      return Vec::new();
    };

    let mut items = Vec::new();
    for (candidate, score) in scores.values().into_iter().enumerate() {
      if score.is_nan() || score < threshold {
        continue;
      }

      let mut coords = [0.0f32; 4];
      let mut complete = true;
      for (k, coord) in coords.iter_mut().enumerate() {
        // 字段名只对第一个候选有意义
        let name = (candidate == 0).then_some(BOX_FIELD_NAMES[k]);
        match boxes.value_at(candidate * 4 + k, name) {
          Some(v) if !v.is_nan() => *coord = v.clamp(0.0, 1.0),
          _ => {
            complete = false;
            break;
          }
        }
      }

      if !complete {
        debug!("候选 {} 缺少完整的边界框，已忽略", candidate);
        continue;
      }

      items.push(Detection {
        confidence: score.min(1.0),
        x: coords[0],
        y: coords[1],
        width: coords[2],
        height: coords[3],
      });
    }

    debug!("检测到 {} 张卡牌", items.len());
    items
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::OutputTensor;

  #[derive(Debug, thiserror::Error)]
  #[error("推理失败")]
  struct Broken;

  struct Fixed(ModelOutputs);

  impl InferenceModel for Fixed {
    type Error = Broken;
    fn run(&self, _: &Tensor) -> Result<ModelOutputs, Broken> {
      Ok(self.0.clone())
    }
  }

  struct Failing;

  impl InferenceModel for Failing {
    type Error = Broken;
    fn run(&self, _: &Tensor) -> Result<ModelOutputs, Broken> {
      Err(Broken)
    }
  }

  fn tensor() -> Tensor {
    Tensor::from_rgb(&[0u8; 12], 2, 2).unwrap()
  }

  fn outputs(score: f32, bbox: [f32; 4]) -> ModelOutputs {
    ModelOutputs::new()
      .with("confidence", OutputTensor::Dense(vec![score]))
      .with("boxes", OutputTensor::Dense(bbox.to_vec()))
  }

  #[test]
  fn keeps_detection_above_threshold() {
    let stage = DetectorStage::new(Fixed(outputs(0.9, [0.4, 0.4, 0.2, 0.2])), 416);
    let detections = stage.detect(&tensor(), DEFAULT_DETECTION_THRESHOLD).unwrap();
    assert_eq!(
      detections,
      vec![Detection {
        confidence: 0.9,
        x: 0.4,
        y: 0.4,
        width: 0.2,
        height: 0.2
      }]
    );
  }

  #[test]
  fn drops_detection_below_threshold() {
    let stage = DetectorStage::new(Fixed(outputs(0.5, [0.4, 0.4, 0.2, 0.2])), 416);
    assert!(stage.detect(&tensor(), 0.75).unwrap().is_empty());
    // 恰好等于阈值时保留
    let stage = DetectorStage::new(Fixed(outputs(0.75, [0.4, 0.4, 0.2, 0.2])), 416);
    assert_eq!(stage.detect(&tensor(), 0.75).unwrap().len(), 1);
  }

  #[test]
  fn too_few_outputs_is_a_miss() {
    let single = ModelOutputs::new().with("confidence", OutputTensor::Dense(vec![0.99]));
    assert!(DetectorStage::<Fixed>::postprocess(&single, 0.75).is_empty());
    assert!(DetectorStage::<Fixed>::postprocess(&ModelOutputs::new(), 0.75).is_empty());
  }

  #[test]
  fn reads_sparse_box_by_field_name() {
    let bbox = [("x", 0.1), ("y", 0.2), ("width", 0.3), ("height", 0.4)]
      .into_iter()
      .map(|(k, v)| (k.to_string(), v))
      .collect();
    let outputs = ModelOutputs::new()
      .with("boxes", OutputTensor::Sparse(bbox))
      .with("scores", OutputTensor::Sparse([("0".to_string(), 0.8)].into()));
    let detections = DetectorStage::<Fixed>::postprocess(&outputs, 0.75);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].x, 0.1);
    assert_eq!(detections[0].height, 0.4);
  }

  #[test]
  fn unnamed_outputs_fall_back_to_position() {
    let outputs = ModelOutputs::new()
      .with("output_0", OutputTensor::Dense(vec![0.95]))
      .with("output_1", OutputTensor::Dense(vec![0.5, 0.5, 0.1, 0.1]));
    let detections = DetectorStage::<Fixed>::postprocess(&outputs, 0.75);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].confidence, 0.95);
  }

  #[test]
  fn filters_multiple_candidates_and_clamps_boxes() {
    let outputs = ModelOutputs::new()
      .with("confidence", OutputTensor::Dense(vec![0.8, 0.3, 0.99, 0.9]))
      .with(
        "boxes",
        OutputTensor::Dense(vec![
          0.1, 0.1, 0.2, 0.2, //
          0.5, 0.5, 0.2, 0.2, //
          -0.1, 0.9, 1.3, 0.2,
        ]),
      );
    let detections = DetectorStage::<Fixed>::postprocess(&outputs, 0.75);
    // 第四个候选没有对应的框
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[1].x, 0.0);
    assert_eq!(detections[1].width, 1.0);
    for det in &detections {
      assert!(det.confidence >= 0.75);
      for v in [det.x, det.y, det.width, det.height] {
        assert!((0.0..=1.0).contains(&v));
      }
    }
  }

  #[test]
  fn nan_or_negative_threshold_keeps_confidence_in_range() {
    let weak = outputs(0.05, [0.4, 0.4, 0.2, 0.2]);
    assert!(DetectorStage::<Fixed>::postprocess(&weak, f32::NAN).is_empty());

    let negative = outputs(-0.3, [0.4, 0.4, 0.2, 0.2]);
    assert!(DetectorStage::<Fixed>::postprocess(&negative, -1.0).is_empty());
    assert_eq!(DetectorStage::<Fixed>::postprocess(&weak, -1.0).len(), 1);
  }

  #[test]
  fn model_failure_is_reported() {
    let stage = DetectorStage::new(Failing, 416);
    assert!(stage.detect(&tensor(), 0.75).is_err());
  }
}
