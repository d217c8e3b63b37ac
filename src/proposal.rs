// 该文件是 Lupai （路牌） 项目的一部分。
// src/proposal.rs - 候选区域定义
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

use std::collections::HashMap;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ProposalError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的边界框: ({0}, {1}, {2}, {3})")]
  InvalidBox(f32, f32, f32, f32),
  #[error("候选区域 {0} 的置信度 {1} 不在 [0, 1] 内")]
  InvalidScore(String, f32),
  #[error("候选区域文件格式错误: {0}")]
  InvalidFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 帧像素坐标下的轴对齐矩形 `(left, top, right, bottom)`
///
/// 构造时保证 `right > left` 且 `bottom > top`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
  left: f32,
  top: f32,
  right: f32,
  bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Result<Self, ProposalError> {
    let finite = [left, top, right, bottom].iter().all(|v| v.is_finite());
    if !finite || right <= left || bottom <= top {
      return Err(ProposalError::InvalidBox(left, top, right, bottom));
    }
    Ok(Self {
      left,
      top,
      right,
      bottom,
    })
  }

  pub fn left(&self) -> f32 {
    self.left
  }

  pub fn top(&self) -> f32 {
    self.top
  }

  pub fn right(&self) -> f32 {
    self.right
  }

  pub fn bottom(&self) -> f32 {
    self.bottom
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  /// 裁剪结果的像素尺寸，截断取整且至少为 1
  pub fn pixel_size(&self) -> (u32, u32) {
    let w = (self.width() as u32).max(1);
    let h = (self.height() as u32).max(1);
    (w, h)
  }

  /// 裁剪原点在源帧中的像素坐标
  pub fn pixel_origin(&self) -> (i64, i64) {
    (self.left.floor() as i64, self.top.floor() as i64)
  }
}

impl TryFrom<[f32; 4]> for BoundingBox {
  type Error = ProposalError;

  fn try_from([left, top, right, bottom]: [f32; 4]) -> Result<Self, Self::Error> {
    BoundingBox::new(left, top, right, bottom)
  }
}

impl From<BoundingBox> for [f32; 4] {
  fn from(b: BoundingBox) -> Self {
    [b.left, b.top, b.right, b.bottom]
  }
}

/// 上游检测器给出的候选区域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
  pub id: String,
  pub label: String,
  pub score: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

/// 候选区域生成器，即上游的通用检测器
///
/// 对同一帧的输出顺序必须稳定，级联不会重新排序。
pub trait RegionProposer {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&self, frame: &RgbImage) -> Result<Vec<Proposal>, Self::Error>;

  /// 在 `run` 之前告知下一帧的来源，按帧回放记录的生成器据此切换
  fn select_frame(&mut self, name: &str, index: u64) {
    let _ = (name, index);
  }
}

impl<P: RegionProposer + ?Sized> RegionProposer for &P {
  type Error = P::Error;

  fn run(&self, frame: &RgbImage) -> Result<Vec<Proposal>, Self::Error> {
    (**self).run(frame)
  }
}

/// 对任意帧都返回同一组候选区域
#[derive(Debug, Clone, Default)]
pub struct StaticProposer {
  proposals: Vec<Proposal>,
}

impl StaticProposer {
  pub fn new(proposals: Vec<Proposal>) -> Self {
    Self { proposals }
  }

  pub fn from_json(text: &str) -> Result<Self, ProposalError> {
    let proposals: Vec<Proposal> = serde_json::from_str(text)?;
    validate_scores(&proposals)?;
    debug!("读取到 {} 个候选区域", proposals.len());
    Ok(Self { proposals })
  }

  pub fn proposals(&self) -> &[Proposal] {
    &self.proposals
  }
}

impl RegionProposer for StaticProposer {
  type Error = std::convert::Infallible;

  fn run(&self, _frame: &RgbImage) -> Result<Vec<Proposal>, Self::Error> {
    Ok(self.proposals.clone())
  }
}

fn validate_scores(proposals: &[Proposal]) -> Result<(), ProposalError> {
  for p in proposals {
    if !(0.0..=1.0).contains(&p.score) {
      error!("候选区域 {} 的置信度无效: {}", p.id, p.score);
      return Err(ProposalError::InvalidScore(p.id.clone(), p.score));
    }
  }
  Ok(())
}

/// 回放上游检测器记录的候选区域
///
/// 记录文件为 JSON，有两种形式：
/// - 数组：所有帧共用同一组候选区域
/// - 对象：键为帧文件名（或帧序号），值为该帧的候选区域
///
/// 按帧记录时，没有对应条目的帧不产生候选区域。
#[derive(Debug, Clone)]
pub enum RecordedProposer {
  Shared(StaticProposer),
  PerFrame {
    frames: HashMap<String, Vec<Proposal>>,
    current: Vec<Proposal>,
  },
}

impl RecordedProposer {
  pub fn from_json(text: &str) -> Result<Self, ProposalError> {
    match serde_json::from_str::<Value>(text)? {
      Value::Array(list) => {
        let proposals: Vec<Proposal> = serde_json::from_value(Value::Array(list))?;
        validate_scores(&proposals)?;
        debug!("读取到 {} 个共用候选区域", proposals.len());
        Ok(RecordedProposer::Shared(StaticProposer::new(proposals)))
      }
      Value::Object(map) => {
        let frames: HashMap<String, Vec<Proposal>> = serde_json::from_value(Value::Object(map))?;
        for proposals in frames.values() {
          validate_scores(proposals)?;
        }
        debug!("读取到 {} 帧的候选区域记录", frames.len());
        Ok(RecordedProposer::PerFrame {
          frames,
          current: Vec::new(),
        })
      }
      _ => Err(ProposalError::InvalidFormat(
        "顶层必须是数组或以帧为键的对象".to_string(),
      )),
    }
  }
}

impl FromUrlWithScheme for RecordedProposer {
  const SCHEME: &'static str = "proposals";
}

impl FromUrl for RecordedProposer {
  type Error = ProposalError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ProposalError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    info!("读取候选区域文件: {}", url.path());
    let text = std::fs::read_to_string(url.path())?;
    Self::from_json(&text)
  }
}

impl RegionProposer for RecordedProposer {
  type Error = std::convert::Infallible;

  fn run(&self, frame: &RgbImage) -> Result<Vec<Proposal>, Self::Error> {
    match self {
      RecordedProposer::Shared(proposer) => proposer.run(frame),
      RecordedProposer::PerFrame { current, .. } => Ok(current.clone()),
    }
  }

  fn select_frame(&mut self, name: &str, index: u64) {
    if let RecordedProposer::PerFrame { frames, current } = self {
      match frames.get(name).or_else(|| frames.get(&index.to_string())) {
        Some(proposals) => current.clone_from(proposals),
        None => {
          debug!("帧 {} ({}) 没有候选区域记录", name, index);
          current.clear();
        }
      }
    }
  }
}
