// 该文件是 Lupai （路牌） 项目的一部分。
// src/cascade.rs - 检测-分类级联
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

use std::{borrow::Cow, sync::Arc};

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, debug_span, info, warn};

use crate::{
  config::CascadeConfig,
  model::{Classifier, ClassifierError, Scratch},
  preprocess::{self, PreprocessError},
  proposal::{BoundingBox, Proposal, RegionProposer},
};

#[derive(Error, Debug)]
pub enum CascadeError {
  #[error("候选区域生成失败: {0}")]
  Proposer(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("分类错误: {0}")]
  Classify(#[from] ClassifierError),
}

/// 级联输出的识别结果
///
/// `id` 与 `bbox` 原样来自候选区域，`label` 来自分类器，
/// `score` 是候选区域的检测置信度，分类器自身的分数见 `class_score`。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedObject {
  pub id: String,
  pub label: String,
  pub score: f32,
  pub class_score: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

/// 级联所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeState {
  #[default]
  Idle,
  Detecting,
  Classifying,
  Done,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeEvent {
  Start,
  ProposalsReady,
  ProposalsFailed,
  Finished,
}

impl CascadeState {
  /// 状态转移，不合法的事件保持当前状态
  pub fn next(self, event: CascadeEvent) -> Self {
    use CascadeEvent::*;
    use CascadeState::*;

    match (self, event) {
      (Idle | Done | Failed, Start) => Detecting,
      (Detecting, ProposalsReady) => Classifying,
      (Detecting, ProposalsFailed) => Failed,
      (Classifying, Finished) => Done,
      (state, _) => state,
    }
  }
}

/// 检测-分类级联
///
/// 分类器可通过 `Arc` 在多个级联间共享；每个级联持有自己的缓冲区，
/// `run` 需要 `&mut self`，因此同一缓冲区不会被两帧交错写入。
pub struct Cascade<P, const W: u32, const H: u32> {
  proposer: P,
  classifier: Arc<Classifier<W, H>>,
  scratch: Scratch<W, H>,
  config: CascadeConfig,
  state: CascadeState,
}

impl<P: RegionProposer, const W: u32, const H: u32> Cascade<P, W, H> {
  pub fn new(proposer: P, classifier: Arc<Classifier<W, H>>) -> Self {
    let scratch = classifier.scratch();
    Self {
      proposer,
      classifier,
      scratch,
      config: CascadeConfig::default(),
      state: CascadeState::Idle,
    }
  }

  pub fn with_config(mut self, config: CascadeConfig) -> Self {
    self.config = config;
    self
  }

  pub fn state(&self) -> CascadeState {
    self.state
  }

  pub fn classifier(&self) -> &Arc<Classifier<W, H>> {
    &self.classifier
  }

  /// 告知候选区域生成器下一帧的来源
  pub fn select_frame(&mut self, name: &str, index: u64) {
    debug!("选择帧 {} ({})", name, index);
    self.proposer.select_frame(name, index);
  }

  /// 不转移所有权地处理一帧，帧保持不变
  pub fn run_borrowed(&mut self, frame: &RgbImage) -> Result<Vec<RecognizedObject>, CascadeError> {
    self.run(Cow::Borrowed(frame))
  }

  /// 接管帧的所有权，所有候选区域处理完后释放
  pub fn run_owned(&mut self, frame: RgbImage) -> Result<Vec<RecognizedObject>, CascadeError> {
    self.run(Cow::Owned(frame))
  }

  /// 处理一帧
  ///
  /// 只有候选区域生成失败会中止本次调用；单个区域的预处理或分类
  /// 失败只会丢弃该区域。
  pub fn run(&mut self, frame: Cow<'_, RgbImage>) -> Result<Vec<RecognizedObject>, CascadeError> {
    self.state = self.state.next(CascadeEvent::Start);

    let proposals = {
      let _span = debug_span!("detect").entered();
      match self.proposer.run(&frame) {
        Ok(proposals) => proposals,
        Err(e) => {
          self.state = self.state.next(CascadeEvent::ProposalsFailed);
          return Err(CascadeError::Proposer(Box::new(e)));
        }
      }
    };
    self.state = self.state.next(CascadeEvent::ProposalsReady);
    debug!("候选区域数量: {}", proposals.len());

    let mut recognized = Vec::new();
    for proposal in &proposals {
      if proposal.score < self.config.threshold {
        debug!("跳过候选区域 {}: 置信度 {:.2}", proposal.id, proposal.score);
        continue;
      }

      let _span = debug_span!("recognizeImage", id = %proposal.id).entered();
      match recognize(
        &frame,
        proposal,
        &self.classifier,
        &mut self.scratch,
        &self.config,
      ) {
        Ok(object) => {
          debug!(
            "候选区域 {} ({}) 识别为 {}",
            proposal.id, proposal.label, object.label
          );
          recognized.push(object);
        }
        Err(e) => warn!("候选区域 {} 被丢弃: {}", proposal.id, e),
      }
    }

    drop(frame);
    self.state = self.state.next(CascadeEvent::Finished);
    info!(
      "本帧候选区域 {} 个, 识别 {} 个",
      proposals.len(),
      recognized.len()
    );
    Ok(recognized)
  }
}

fn recognize<const W: u32, const H: u32>(
  frame: &RgbImage,
  proposal: &Proposal,
  classifier: &Classifier<W, H>,
  scratch: &mut Scratch<W, H>,
  config: &CascadeConfig,
) -> Result<RecognizedObject, CascadeError> {
  preprocess::prepare(
    frame,
    &proposal.bbox,
    config.background,
    scratch.tensor_mut(),
    classifier.config(),
  )?;
  let classification = classifier.classify(scratch)?;

  Ok(RecognizedObject {
    id: proposal.id.clone(),
    label: classification.label.to_string(),
    score: proposal.score,
    class_score: classification.score,
    bbox: proposal.bbox,
  })
}
