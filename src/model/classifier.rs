// 该文件是 Lupai （路牌） 项目的一部分。
// src/model/classifier.rs - 路牌分类器
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
  fs::File,
  path::{Path, PathBuf},
  sync::Mutex,
};

use memmap2::Mmap;
use tracing::{debug, debug_span, info, warn};
use url::Url;

use crate::{
  FromUrl,
  config::{ClassifierConfig, SIGN_CLASSIFIER_INPUT_SIZE},
  frame::NhwcTensor,
  model::{ClassifierError, EngineBackend, EngineError, ExecutionPath, InferenceEngine, LabelTable, argmax},
};

/// 参考配置下的路牌分类器
pub type SignClassifier = Classifier<SIGN_CLASSIFIER_INPUT_SIZE, SIGN_CLASSIFIER_INPUT_SIZE>;

/// 一次推理所需的输入张量与输出分数缓冲区
///
/// 由调用方持有，同一时刻只能被一个级联使用。
#[derive(Debug, Clone)]
pub struct Scratch<const W: u32, const H: u32> {
  tensor: NhwcTensor<W, H>,
  scores: Vec<f32>,
}

impl<const W: u32, const H: u32> Scratch<W, H> {
  pub fn new(quantized: bool, num_classes: usize) -> Self {
    Self {
      tensor: NhwcTensor::new(quantized),
      scores: vec![0.0; num_classes],
    }
  }

  pub fn tensor(&self) -> &NhwcTensor<W, H> {
    &self.tensor
  }

  pub fn tensor_mut(&mut self) -> &mut NhwcTensor<W, H> {
    &mut self.tensor
  }

  /// 最近一次推理的输出分数
  pub fn scores(&self) -> &[f32] {
    &self.scores
  }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct Classification<'a> {
  pub index: usize,
  pub label: &'a str,
  pub score: f32,
}

/// 路牌分类器，构造后不可变
pub struct Classifier<const W: u32, const H: u32> {
  labels: LabelTable,
  engine: Mutex<Box<dyn InferenceEngine>>,
  execution_path: ExecutionPath,
  config: ClassifierConfig,
}

impl<const W: u32, const H: u32> std::fmt::Debug for Classifier<W, H> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Classifier")
      .field("input", &(W, H))
      .field("labels", &self.labels.len())
      .field("execution_path", &self.execution_path)
      .field("config", &self.config)
      .finish()
  }
}

impl<const W: u32, const H: u32> Classifier<W, H> {
  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn execution_path(&self) -> ExecutionPath {
    self.execution_path
  }

  pub fn config(&self) -> &ClassifierConfig {
    &self.config
  }

  pub fn input_size(&self) -> (u32, u32) {
    (W, H)
  }

  /// 创建与本分类器匹配的缓冲区
  pub fn scratch(&self) -> Scratch<W, H> {
    Scratch::new(self.config.quantized, self.labels.len())
  }

  /// 对 `scratch` 中已编码的张量执行推理并解码标签
  pub fn classify<'a>(&'a self, scratch: &mut Scratch<W, H>) -> Result<Classification<'a>, ClassifierError> {
    let _span = debug_span!("run").entered();

    scratch.scores.resize(self.labels.len(), 0.0);
    {
      let mut engine = self.engine.lock().map_err(|_| {
        ClassifierError::Inference(EngineError::Backend("推理引擎锁已损坏".to_string()))
      })?;
      engine
        .infer(scratch.tensor.view(), &mut scratch.scores)
        .map_err(ClassifierError::Inference)?;
    }

    let (index, score) = argmax(&scratch.scores)
      .ok_or_else(|| ClassifierError::Inference(EngineError::ShortOutput { expected: 1, actual: 0 }))?;
    let label = self
      .labels
      .get(index)
      .ok_or_else(|| ClassifierError::Inference(EngineError::ShortOutput { expected: index + 1, actual: 0 }))?;
    debug!("分类结果: {} ({}), 分数 {:.4}", label, index, score);

    Ok(Classification { index, label, score })
  }
}

/// 分类器构建器
#[derive(Debug, Clone)]
pub struct ClassifierBuilder {
  model_path: PathBuf,
  label_path: PathBuf,
  config: ClassifierConfig,
}

impl ClassifierBuilder {
  pub fn new(model_path: impl Into<PathBuf>, label_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      label_path: label_path.into(),
      config: ClassifierConfig::default(),
    }
  }

  pub fn config(mut self, config: ClassifierConfig) -> Self {
    self.config = config;
    self
  }

  /// 从 `<scheme>:///path/model?labels=/path/labels.txt` 解析路径
  pub fn from_url_parts(url: &Url) -> Result<Self, ClassifierError> {
    let labels = url
      .query_pairs()
      .find(|(k, _)| k == "labels")
      .map(|(_, v)| v.into_owned())
      .ok_or_else(|| ClassifierError::ModelPath(format!("{} 缺少 labels 参数", url)))?;
    Ok(Self::new(url.path(), labels))
  }

  pub fn build<const W: u32, const H: u32>(
    self,
    backend: &dyn EngineBackend,
  ) -> Result<Classifier<W, H>, ClassifierError> {
    info!("加载模型文件: {}", self.model_path.display());
    let (engine, execution_path) = {
      let model = map_model(&self.model_path)?;
      debug!("模型文件大小: {:.2} MB", model.len() as f64 / (1024.0 * 1024.0));
      load_engine(backend, &model)?
    };
    info!("模型加载完成, 执行路径: {:?}", execution_path);

    let labels = LabelTable::load(&self.label_path)?;
    info!("标签加载完成, 共 {} 类", labels.len());

    Ok(Classifier {
      labels,
      engine: Mutex::new(engine),
      execution_path,
      config: self.config,
    })
  }
}

fn map_model(path: &Path) -> Result<Mmap, ClassifierError> {
  let file = File::open(path)
    .map_err(|e| ClassifierError::model_load(&format!("无法打开 {}", path.display()), e))?;
  let len = file
    .metadata()
    .map_err(|e| ClassifierError::model_load("无法读取模型文件信息", e))?
    .len();
  if len == 0 {
    return Err(ClassifierError::ModelLoad(format!("模型文件为空: {}", path.display())));
  }

  // SAFETY: 只读映射，映射仅在构建引擎期间存活
  unsafe { Mmap::map(&file) }.map_err(|e| ClassifierError::model_load("无法映射模型文件", e))
}

fn load_engine(
  backend: &dyn EngineBackend,
  model: &[u8],
) -> Result<(Box<dyn InferenceEngine>, ExecutionPath), ClassifierError> {
  match backend.load_accelerated(model) {
    Ok(engine) => {
      info!("{} 加速路径可用", backend.name());
      return Ok((engine, ExecutionPath::Accelerated));
    }
    Err(EngineError::AccelerationUnavailable) => {
      debug!("{} 不提供加速路径", backend.name());
    }
    Err(e) => {
      warn!("{} 加速路径初始化失败, 回退到默认路径: {}", backend.name(), e);
    }
  }

  let engine = backend
    .load(model)
    .map_err(|e| ClassifierError::model_load(&format!("{} 拒绝了模型", backend.name()), e))?;
  Ok((engine, ExecutionPath::Fallback))
}

impl<const W: u32, const H: u32> FromUrl for Classifier<W, H> {
  type Error = ClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "rknpu")]
      crate::model::RknpuBackend::SCHEME => {
        ClassifierBuilder::from_url_parts(url)?.build(&crate::model::RknpuBackend)
      }
      #[cfg(feature = "onnx")]
      crate::model::OnnxBackend::SCHEME => {
        ClassifierBuilder::from_url_parts(url)?.build(&crate::model::OnnxBackend)
      }
      scheme => Err(ClassifierError::ModelPath(format!(
        "不支持的模型方案: {}，已启用的后端: {:?}（rknn / onnx 需以 --features rknpu / --features onnx 编译）",
        scheme,
        crate::model::compiled_backends()
      ))),
    }
  }
}
