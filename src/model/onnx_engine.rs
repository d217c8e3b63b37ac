// 该文件是 Lupai （路牌） 项目的一部分。
// src/model/onnx_engine.rs - ONNX Runtime 推理后端
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

use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
  session::Session,
  value::Tensor,
};
use tracing::debug;

use crate::{
  frame::{TensorSlice, TensorView},
  model::{EngineBackend, EngineError, InferenceEngine, copy_scores},
};

fn ort_error(err: impl std::fmt::Display) -> EngineError {
  EngineError::Backend(format!("ONNX Runtime 错误: {}", err))
}

fn build_session(model: &[u8], accelerated: bool) -> Result<Session, EngineError> {
  let builder = Session::builder().map_err(ort_error)?;
  let builder = if accelerated {
    builder
      .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
      .map_err(ort_error)?
  } else {
    builder
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(ort_error)?
  };
  builder.commit_from_memory(model).map_err(ort_error)
}

/// ONNX Runtime 后端：CUDA 为加速路径，CPU 为默认路径
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxBackend;

impl OnnxBackend {
  pub const SCHEME: &'static str = "onnx";
}

impl EngineBackend for OnnxBackend {
  fn name(&self) -> &'static str {
    "onnx"
  }

  fn load_accelerated(&self, model: &[u8]) -> Result<Box<dyn InferenceEngine>, EngineError> {
    let session = build_session(model, true)?;
    Ok(Box::new(OnnxEngine { session }))
  }

  fn load(&self, model: &[u8]) -> Result<Box<dyn InferenceEngine>, EngineError> {
    let session = build_session(model, false)?;
    Ok(Box::new(OnnxEngine { session }))
  }
}

struct OnnxEngine {
  session: Session,
}

impl InferenceEngine for OnnxEngine {
  fn infer(&mut self, input: TensorView<'_>, scores: &mut [f32]) -> Result<(), EngineError> {
    let shape = input.shape;
    let value = match input.data {
      TensorSlice::UInt8(data) => Tensor::from_array((shape, data.to_vec()))
        .map_err(ort_error)?
        .into_dyn(),
      TensorSlice::Float32(data) => Tensor::from_array((shape, data.to_vec()))
        .map_err(ort_error)?
        .into_dyn(),
    };

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![value]).map_err(ort_error)?;
    let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(ort_error)?;
    copy_scores(data, scores)
  }
}
