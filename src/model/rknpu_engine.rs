// 该文件是 Lupai （路牌） 项目的一部分。
// src/model/rknpu_engine.rs - RKNPU 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use crate::{
  frame::{TensorSlice, TensorView},
  model::{EngineBackend, EngineError, InferenceEngine, copy_scores},
};

const CLASSIFIER_NUM_INPUTS: u32 = 1;
const CLASSIFIER_NUM_OUTPUTS: u32 = 1;

impl From<rknpu::Error> for EngineError {
  fn from(err: rknpu::Error) -> Self {
    EngineError::Backend(format!("RKNN 错误: {}", err))
  }
}

/// RKNPU 后端
///
/// NPU 是该后端唯一的执行路径，因此以默认路径加载。
#[derive(Debug, Clone, Copy, Default)]
pub struct RknpuBackend;

impl RknpuBackend {
  pub const SCHEME: &'static str = "rknn";
}

impl EngineBackend for RknpuBackend {
  fn name(&self) -> &'static str {
    "rknpu"
  }

  fn load(&self, model: &[u8]) -> Result<Box<dyn InferenceEngine>, EngineError> {
    info!("创建 RKNN 推理上下文");
    let context = Context::new(model, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(EngineError::InvalidModel(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    if num_inputs != CLASSIFIER_NUM_INPUTS || num_outputs != CLASSIFIER_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        CLASSIFIER_NUM_INPUTS, CLASSIFIER_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(EngineError::InvalidModel(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        CLASSIFIER_NUM_INPUTS, CLASSIFIER_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }

    Ok(Box::new(RknpuEngine { context }))
  }
}

struct RknpuEngine {
  context: Context,
}

// SAFETY: 上下文只经由分类器内部的互斥锁访问，不会被并发使用
unsafe impl Send for RknpuEngine {}

impl InferenceEngine for RknpuEngine {
  fn infer(&mut self, input: TensorView<'_>, scores: &mut [f32]) -> Result<(), EngineError> {
    let tensor_type = match input.data {
      TensorSlice::UInt8(_) => TensorType::UInt8,
      TensorSlice::Float32(_) => TensorType::Float32,
    };

    debug!("设置模型输入");
    self
      .context
      .set_input(0, input.as_bytes(), TensorFormat::NHWC, tensor_type)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?;
    copy_scores(data, scores)
  }
}
