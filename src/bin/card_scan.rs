// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/bin/card_scan.rs - 持续扫描卡牌并汇总扫描记录
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
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use card_scan::{
  FromUrl,
  config::{DEFAULT_CLASSIFIER_SIZE, DEFAULT_DETECTOR_SIZE, ScanConfig},
  history::ScanHistory,
  input::InputWrapper,
  model::{DEFAULT_DETECTION_THRESHOLD, ReplayModelBuilder},
  pipeline::CardPipeline,
  publish::result_channel,
  schedule::DEFAULT_SKIP_INTERVAL,
  task::{ScanTask, Task},
};
use tracing::{info, warn};

/// CardScan 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型路径
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 识别模型路径
  #[arg(long, value_name = "MODEL")]
  pub classifier: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 卡牌编号列表，每行一个，按识别模型的类别顺序排列
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  #[arg(long, default_value_t = DEFAULT_SKIP_INTERVAL)]
  pub interval: u64,
  #[arg(long, default_value_t = DEFAULT_DETECTION_THRESHOLD)]
  pub threshold: f32,
  #[arg(long, default_value_t = DEFAULT_DETECTOR_SIZE)]
  pub detector_size: usize,
  #[arg(long, default_value_t = DEFAULT_CLASSIFIER_SIZE)]
  pub classifier_size: usize,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 扫描记录导出路径 (JSON)
  #[arg(long, value_name = "FILE")]
  pub history_out: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型路径: {}", args.detector);
  info!("识别模型路径: {}", args.classifier);
  info!("输入来源: {}", args.input);

  let config = ScanConfig::default()
    .with_detector_size(args.detector_size)
    .with_classifier_size(args.classifier_size)
    .with_threshold(args.threshold)
    .with_skip_interval(args.interval);
  config.validate()?;

  let detector = ReplayModelBuilder::from_url(&args.detector)?.build()?;
  let classifier = ReplayModelBuilder::from_url(&args.classifier)?.build()?;
  let mut pipeline = CardPipeline::new(detector, classifier, &config);
  if let Some(path) = &args.labels {
    let labels = std::fs::read_to_string(path)
      .with_context(|| format!("无法读取标签文件: {}", path.display()))?
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(String::from)
      .collect::<Vec<_>>();
    info!("加载 {} 个卡牌标签", labels.len());
    pipeline = pipeline.with_labels(labels);
  }
  let input = InputWrapper::from_url(&args.input)?;

  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.store(true, Ordering::Release);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
  }

  let (publisher, receiver) = result_channel();
  let recorder = thread::Builder::new()
    .name("scan-history".to_string())
    .spawn(move || {
      let mut history = ScanHistory::new();
      for result in receiver.iter() {
        history.record(&result);
      }
      if receiver.dropped() > 0 {
        info!("共有 {} 个结果未被及时取走", receiver.dropped());
      }
      history
    })?;

  let report = ScanTask::default()
    .with_frame_number(args.frame_number)
    .with_stop_flag(stop)
    .run_task(input, pipeline, publisher)?;
  info!(
    "扫描结束: 共 {} 帧, 处理 {} 帧",
    report.frames_seen, report.frames_processed
  );

  let history = recorder
    .join()
    .map_err(|_| anyhow::anyhow!("扫描记录线程异常退出"))?;
  for entry in history.entries() {
    info!("{} x {}", entry.card_id, entry.quantity);
  }

  if let Some(path) = &args.history_out {
    std::fs::write(path, history.to_json()?)
      .with_context(|| format!("无法写入扫描记录: {}", path.display()))?;
    info!("扫描记录已保存到 {}", path.display());
  }

  Ok(())
}
