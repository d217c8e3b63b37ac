// 该文件是 Lupai （路牌） 项目的一部分。
// src/model.rs - 推理后端与标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::frame::TensorView;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("加速执行路径不可用")]
  AccelerationUnavailable,
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("输入张量不受支持: {0}")]
  UnsupportedInput(String),
  #[error("模型输出分数不足: 期望至少 {expected}, 实际 {actual}")]
  ShortOutput { expected: usize, actual: usize },
  #[error("推理后端错误: {0}")]
  Backend(String),
}

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("标签加载错误: {0}")]
  LabelLoad(String),
  #[error("推理错误: {0}")]
  Inference(EngineError),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
}

impl ClassifierError {
  pub fn model_load(msg: &str, e: impl std::fmt::Display) -> Self {
    ClassifierError::ModelLoad(format!("{}: {}", msg, e))
  }

  pub fn label_load(msg: &str, e: impl std::fmt::Display) -> Self {
    ClassifierError::LabelLoad(format!("{}: {}", msg, e))
  }
}

/// 推理所走的执行路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
  /// 加速路径（NPU、GPU 等）
  Accelerated,
  /// 后端默认路径
  Fallback,
}

/// 已加载的推理引擎
pub trait InferenceEngine: Send {
  /// 执行一次推理，把前 `scores.len()` 个输出分数写入 `scores`
  fn infer(&mut self, input: TensorView<'_>, scores: &mut [f32]) -> Result<(), EngineError>;
}

/// 推理后端，负责把模型字节构建为引擎
pub trait EngineBackend {
  fn name(&self) -> &'static str;

  /// 尝试构建加速引擎，不支持时返回 [`EngineError::AccelerationUnavailable`]
  fn load_accelerated(&self, model: &[u8]) -> Result<Box<dyn InferenceEngine>, EngineError> {
    let _ = model;
    Err(EngineError::AccelerationUnavailable)
  }

  fn load(&self, model: &[u8]) -> Result<Box<dyn InferenceEngine>, EngineError>;
}

/// 把模型输出复制到分数缓冲区，多余的输出被忽略
pub fn copy_scores(output: &[f32], scores: &mut [f32]) -> Result<(), EngineError> {
  if output.len() < scores.len() {
    return Err(EngineError::ShortOutput {
      expected: scores.len(),
      actual: output.len(),
    });
  }
  scores.copy_from_slice(&output[..scores.len()]);
  Ok(())
}

/// 取最大分数的下标，并列时取最小下标
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
  let (&first, rest) = scores.split_first()?;
  let mut best = (0, first);
  for (i, &score) in rest.iter().enumerate() {
    if score > best.1 {
      best = (i + 1, score);
    }
  }
  Some(best)
}

/// 分类标签表，第 i 项对应模型第 i 个输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl LabelTable {
  /// 按行解析标签，末尾的空行不计入
  pub fn parse(text: &str) -> Result<Self, ClassifierError> {
    let mut labels: Vec<String> = text.lines().map(str::to_string).collect();
    while labels.last().is_some_and(|l| l.trim().is_empty()) {
      labels.pop();
    }

    if labels.is_empty() {
      return Err(ClassifierError::LabelLoad("标签文件为空".to_string()));
    }

    for (i, label) in labels.iter().enumerate() {
      debug!("标签 {}: {}", i, label);
    }

    Ok(Self {
      labels: labels.into_boxed_slice(),
    })
  }

  pub fn load(path: &Path) -> Result<Self, ClassifierError> {
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)
      .map_err(|e| ClassifierError::label_load(&format!("无法读取 {}", path.display()), e))?;
    Self::parse(&text)
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

mod classifier;
pub use self::classifier::{Classification, Classifier, ClassifierBuilder, Scratch, SignClassifier};

#[cfg(feature = "rknpu")]
mod rknpu_engine;
#[cfg(feature = "rknpu")]
pub use self::rknpu_engine::RknpuBackend;

#[cfg(feature = "onnx")]
mod onnx_engine;
#[cfg(feature = "onnx")]
pub use self::onnx_engine::OnnxBackend;

/// 模型参数的详细帮助
pub const MODEL_URL_HELP: &str = "分类模型 URL，labels 参数指定标签文件：\n\
  rknn:///path/model.rknn?labels=/path/labels.txt（需以 --features rknpu 编译）\n\
  onnx:///path/model.onnx?labels=/path/labels.txt（需以 --features onnx 编译）\n\
默认构建不包含任何推理后端。";

/// 编译时启用的推理后端对应的 URL 方案
#[allow(unused_mut)]
pub fn compiled_backends() -> Vec<&'static str> {
  let mut schemes = Vec::new();
  #[cfg(feature = "rknpu")]
  schemes.push(RknpuBackend::SCHEME);
  #[cfg(feature = "onnx")]
  schemes.push(OnnxBackend::SCHEME);
  schemes
}
