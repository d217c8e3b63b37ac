// 该文件是 Lupai （路牌） 项目的一部分。
// src/output.rs - 识别结果输出
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

use std::io::Write;

use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, cascade::RecognizedObject, input::Frame};

pub trait Render<F, O: ?Sized>: Sized {
  type Error;
  fn render_result(&self, frame: &F, result: &O) -> Result<(), Self::Error>;
}

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 一帧结果的 JSON 记录
pub fn frame_record(frame: &Frame, result: &[RecognizedObject]) -> Result<Value, serde_json::Error> {
  Ok(json!({
    "frame": frame.name,
    "index": frame.index,
    "width": frame.image.width(),
    "height": frame.image.height(),
    "objects": serde_json::to_value(result)?,
  }))
}

/// 每帧向标准输出写一行 JSON
pub struct StdoutOutput;

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(StdoutOutput)
  }
}

impl Render<Frame, [RecognizedObject]> for StdoutOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &[RecognizedObject]) -> Result<(), Self::Error> {
    let record = frame_record(frame, result)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", record)?;
    Ok(())
  }
}

pub enum OutputWrapper {
  Stdout(StdoutOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      StdoutOutput::SCHEME => Ok(OutputWrapper::Stdout(StdoutOutput::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordOutput::from_url(url)?,
      )),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<Frame, [RecognizedObject]> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &[RecognizedObject]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Stdout(output) => output.render_result(frame, result),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::proposal::BoundingBox;
  use image::RgbImage;

  #[test]
  fn record_carries_objects() {
    let frame = Frame {
      image: RgbImage::new(640, 480),
      index: 3,
      name: "f.png".to_string(),
    };
    let objects = vec![RecognizedObject {
      id: "1".to_string(),
      label: "yield".to_string(),
      score: 0.95,
      class_score: 0.9,
      bbox: BoundingBox::new(100.0, 100.0, 300.0, 300.0).unwrap(),
    }];
    let record = frame_record(&frame, &objects).unwrap();
    assert_eq!(record["index"], 3);
    assert_eq!(record["objects"][0]["label"], "yield");
    assert_eq!(record["objects"][0]["box"][2], 300.0);
  }

  #[test]
  fn unknown_output_scheme() {
    let url = Url::parse("rtsp://localhost/out").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }
}
