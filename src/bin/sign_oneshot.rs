// 该文件是 Lupai （路牌） 项目的一部分。
// src/bin/sign_oneshot.rs - 单帧路牌识别
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use lupai::{
  Cascade, FromUrl, SignClassifier,
  input::InputWrapper,
  model::{MODEL_URL_HELP, compiled_backends},
  output::OutputWrapper,
  proposal::RecordedProposer,
  task::{OneShotTask, Task},
};
use tracing::{info, warn};

/// Lupai 单帧识别参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分类模型，例如 rknn:///path/gtsrb.rknn?labels=/path/gtsrb_label.txt
  #[arg(long, value_name = "MODEL", long_help = MODEL_URL_HELP)]
  pub model: Url,
  /// 上游检测器记录的候选区域，例如 proposals:///path/proposals.json
  #[arg(long, value_name = "PROPOSALS")]
  pub proposals: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  if compiled_backends().is_empty() {
    warn!("未启用任何推理后端，请以 --features rknpu 或 --features onnx 重新编译");
  }

  info!("模型路径: {}", args.model);
  info!("候选区域: {}", args.proposals);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let classifier = Arc::new(SignClassifier::from_url(&args.model)?);
  let proposer = RecordedProposer::from_url(&args.proposals)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, Cascade::new(proposer, classifier), output)?;

  Ok(())
}
