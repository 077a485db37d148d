// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/bin/card_scan_oneshot.rs - 单帧检测识别
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use card_scan::{
  FromUrl,
  config::ScanConfig,
  input::InputWrapper,
  model::{DEFAULT_DETECTION_THRESHOLD, ReplayModelBuilder},
  pipeline::CardPipeline,
  publish::result_channel,
  task::{OneShotTask, Task},
};
use tracing::info;

/// CardScan 单帧参数配置
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
  #[arg(long, default_value_t = DEFAULT_DETECTION_THRESHOLD)]
  pub threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型路径: {}", args.detector);
  info!("识别模型路径: {}", args.classifier);
  info!("输入来源: {}", args.input);

  let config = ScanConfig::default().with_threshold(args.threshold);
  config.validate()?;

  let input = InputWrapper::from_url(&args.input)?;
  let detector = ReplayModelBuilder::from_url(&args.detector)?.build()?;
  let classifier = ReplayModelBuilder::from_url(&args.classifier)?.build()?;
  let pipeline = CardPipeline::new(detector, classifier, &config);

  let (publisher, receiver) = result_channel();
  OneShotTask.run_task(input, pipeline, publisher)?;

  let result = receiver
    .try_recv()
    .ok_or_else(|| anyhow::anyhow!("没有推理结果"))?;
  if result.is_empty() {
    info!("未检测到卡牌");
  }
  for (i, card) in result.cards.iter().enumerate() {
    let d = &card.detection;
    match &card.classification {
      Some(c) => info!(
        "卡牌 {}: {} ({:.2}), 位置 ({:.3}, {:.3}, {:.3}, {:.3}), 检测置信度 {:.2}",
        i, c.card_id, c.confidence, d.x, d.y, d.width, d.height, d.confidence
      ),
      None => info!(
        "卡牌 {}: 未识别, 位置 ({:.3}, {:.3}, {:.3}, {:.3}), 检测置信度 {:.2}",
        i, d.x, d.y, d.width, d.height, d.confidence
      ),
    }
  }

  Ok(())
}
