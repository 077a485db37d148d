// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/task.rs - 扫描任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
};

use tracing::{info, warn};

use crate::{
  frame::RawFrame,
  model::InferenceModel,
  pipeline::CardPipeline,
  publish::{PublishOutcome, ResultPublisher},
};

const SCAN_THREAD_NAME: &str = "card-scan";

pub trait Task<I, P, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<TaskReport, Self::Error>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskReport {
  pub frames_seen: u64,
  pub frames_processed: u64,
  pub results_delivered: u64,
  pub results_coalesced: u64,
}

impl TaskReport {
  fn record(&mut self, outcome: PublishOutcome) {
    match outcome {
      PublishOutcome::Delivered => self.results_delivered += 1,
      PublishOutcome::Coalesced => {
        self.results_delivered += 1;
        self.results_coalesced += 1;
      }
      PublishOutcome::Disconnected => {}
    }
  }
}

/// 只处理第一帧，不经过帧调度
pub struct OneShotTask;

impl<F, I, D, C> Task<I, CardPipeline<D, C>, ResultPublisher> for OneShotTask
where
  F: RawFrame,
  I: Iterator<Item = F>,
  D: InferenceModel,
  C: InferenceModel,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: CardPipeline<D, C>,
    output: ResultPublisher,
  ) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let mut report = TaskReport {
      frames_seen: 1,
      ..Default::default()
    };
    let result = pipeline
      .process(&frame, 0)
      .ok_or_else(|| anyhow::anyhow!("输入帧无效"))?;
    info!(
      "推理完成，检测耗时: {:.2?}, 识别耗时: {:.2?}",
      result.detection_time, result.classification_time
    );
    report.frames_processed = 1;
    report.record(output.publish(result));

    Ok(report)
  }
}

/// 持续扫描：逐帧交给调度器，接纳的帧跑完整流水线后发布结果
#[derive(Default, Debug)]
pub struct ScanTask {
  frame_number: Option<u64>,
  stop: Option<Arc<AtomicBool>>,
}

impl ScanTask {
  /// 收到指定数量的帧后退出
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 标志被置位后在下一个帧边界退出
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = Some(stop);
    self
  }

  /// 在独立的处理线程上运行任务
  pub fn spawn<F, I, D, C>(
    self,
    input: I,
    pipeline: CardPipeline<D, C>,
    output: ResultPublisher,
  ) -> std::io::Result<thread::JoinHandle<anyhow::Result<TaskReport>>>
  where
    F: RawFrame,
    I: Iterator<Item = F> + Send + 'static,
    D: InferenceModel + Send + 'static,
    C: InferenceModel + Send + 'static,
  {
    thread::Builder::new()
      .name(SCAN_THREAD_NAME.to_string())
      .spawn(move || self.run_task(input, pipeline, output))
  }

  fn should_stop(&self) -> bool {
    self
      .stop
      .as_ref()
      .map(|stop| stop.load(Ordering::Acquire))
      .unwrap_or(false)
  }
}

impl<F, I, D, C> Task<I, CardPipeline<D, C>, ResultPublisher> for ScanTask
where
  F: RawFrame,
  I: Iterator<Item = F>,
  D: InferenceModel,
  C: InferenceModel,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    mut pipeline: CardPipeline<D, C>,
    output: ResultPublisher,
  ) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let mut report = TaskReport::default();

    for frame in input {
      if self.should_stop() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      report.frames_seen += 1;
      if let Some(result) = pipeline.offer(&frame) {
        report.frames_processed += 1;
        let outcome = output.publish(result);
        if outcome == PublishOutcome::Disconnected {
          warn!("结果接收端已关闭，退出任务循环");
          break;
        }
        report.record(outcome);
      }

      if self
        .frame_number
        .map(|n| report.frames_seen >= n)
        .unwrap_or(false)
      {
        info!("达到指定帧数 {}, 退出任务循环", report.frames_seen);
        break;
      }
    }

    info!(
      "任务完成，共 {} 帧，处理 {} 帧，合并 {} 个结果",
      report.frames_seen, report.frames_processed, report.results_coalesced
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::ScanConfig,
    frame::RgbFrame,
    model::{ModelOutputs, OutputTensor},
    publish::result_channel,
    tensor::Tensor,
  };

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

  fn pipeline(interval: u64) -> CardPipeline<Fixed, Fixed> {
    let detector = Fixed(
      ModelOutputs::new()
        .with("confidence", OutputTensor::Dense(vec![0.9]))
        .with("boxes", OutputTensor::Dense(vec![0.1, 0.1, 0.5, 0.5])),
    );
    let classifier = Fixed(ModelOutputs::new().with(
      "classes",
      OutputTensor::Sparse([("RB-001".to_string(), 0.97)].into()),
    ));
    let config = ScanConfig::default()
      .with_detector_size(16)
      .with_classifier_size(8)
      .with_skip_interval(interval);
    CardPipeline::new(detector, classifier, &config)
  }

  fn frames(count: usize) -> impl Iterator<Item = RgbFrame> {
    (0..count).map(|_| RgbFrame::with_shape(24, 24))
  }

  #[test]
  fn one_shot_processes_first_frame() {
    let (publisher, receiver) = result_channel();
    let report = OneShotTask.run_task(frames(3), pipeline(30), publisher).unwrap();
    assert_eq!(report.frames_processed, 1);
    let result = receiver.recv().unwrap();
    assert_eq!(result.cards[0].card_id(), Some("RB-001"));
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let (publisher, _receiver) = result_channel();
    assert!(OneShotTask.run_task(frames(0), pipeline(30), publisher).is_err());
  }

  #[test]
  fn scan_task_throttles_and_stops_at_frame_limit() {
    let (publisher, receiver) = result_channel();
    let report = ScanTask::default()
      .with_frame_number(Some(10))
      .run_task(frames(100), pipeline(4), publisher)
      .unwrap();
    assert_eq!(report.frames_seen, 10);
    // 计数 0, 4, 8
    assert_eq!(report.frames_processed, 3);
    assert_eq!(report.results_coalesced, 2);
    assert_eq!(receiver.latest().map(|r| r.frame_index), Some(8));
  }

  #[test]
  fn scan_task_honours_stop_flag() {
    let (publisher, _receiver) = result_channel();
    let stop = Arc::new(AtomicBool::new(true));
    let report = ScanTask::default()
      .with_stop_flag(stop)
      .run_task(frames(5), pipeline(1), publisher)
      .unwrap();
    assert_eq!(report.frames_seen, 0);
  }

  #[test]
  fn scan_task_exits_when_receiver_is_gone() {
    let (publisher, receiver) = result_channel();
    drop(receiver);
    let report = ScanTask::default()
      .run_task(frames(50), pipeline(1), publisher)
      .unwrap();
    assert_eq!(report.frames_seen, 1);
    assert_eq!(report.results_delivered, 0);
  }

  #[test]
  fn spawned_task_runs_on_named_thread() {
    let (publisher, receiver) = result_channel();
    let handle = ScanTask::default()
      .spawn(frames(30), pipeline(10), publisher)
      .unwrap();
    assert_eq!(handle.thread().name(), Some("card-scan"));
    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.frames_processed, 3);
    let seen: Vec<u64> = receiver.iter().map(|r| r.frame_index).collect();
    assert!(!seen.is_empty());
    assert_eq!(seen.last(), Some(&20));
  }
}
