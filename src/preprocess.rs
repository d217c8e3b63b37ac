// 该文件是 Lupai （路牌） 项目的一部分。
// src/preprocess.rs - 候选区域裁剪、缩放与编码
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::{debug, debug_span};

use crate::{
  config::{ClassifierConfig, MAX_CROP_AREA_RATIO},
  frame::NhwcTensor,
  proposal::BoundingBox,
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像尺寸不匹配: 期望 {0}x{1}, 实际 {2}x{3}")]
  ShapeMismatch(u32, u32, u32, u32),
  #[error("候选区域过大: {0}x{1}, 源帧 {2}x{3}")]
  RegionTooLarge(u32, u32, u32, u32),
}

/// 从源帧裁剪 `bbox` 区域
///
/// 先用 `background` 填满新图像，再把源帧平移 `(-left, -top)` 后贴入，
/// 超出源帧的部分保持背景色。源帧不会被修改。
///
/// 裁剪面积超过源帧面积的 [`MAX_CROP_AREA_RATIO`] 倍时返回
/// [`PreprocessError::RegionTooLarge`]，不分配缓冲区。
pub fn crop(frame: &RgbImage, bbox: &BoundingBox, background: Rgb<u8>) -> Result<RgbImage, PreprocessError> {
  let (width, height) = bbox.pixel_size();
  let (frame_width, frame_height) = frame.dimensions();

  let frame_area = (frame_width as u64 * frame_height as u64).max(1);
  let within_limit = (width as u64)
    .checked_mul(height as u64)
    .zip(frame_area.checked_mul(MAX_CROP_AREA_RATIO))
    .is_some_and(|(area, limit)| area <= limit);
  if !within_limit {
    return Err(PreprocessError::RegionTooLarge(width, height, frame_width, frame_height));
  }

  let (left, top) = bbox.pixel_origin();
  let mut cropped = RgbImage::from_pixel(width, height, background);
  imageops::replace(&mut cropped, frame, -left, -top);
  Ok(cropped)
}

/// 双线性缩放到 `width x height`，不保持长宽比
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
  if image.dimensions() == (width, height) {
    return image.clone();
  }
  imageops::resize(image, width, height, FilterType::Triangle)
}

/// 按行优先顺序把像素的 R、G、B 通道写入张量
///
/// 写入前会回卷张量游标。量化张量写入原始字节，浮点张量写入
/// `(channel - mean) / std`。
pub fn encode<const W: u32, const H: u32>(
  image: &RgbImage,
  tensor: &mut NhwcTensor<W, H>,
  config: &ClassifierConfig,
) -> Result<(), PreprocessError> {
  let (width, height) = image.dimensions();
  if (width, height) != (W, H) {
    return Err(PreprocessError::ShapeMismatch(W, H, width, height));
  }

  tensor.rewind();
  for Rgb([r, g, b]) in image.pixels() {
    tensor.put_channel(*r, config.mean, config.std);
    tensor.put_channel(*g, config.mean, config.std);
    tensor.put_channel(*b, config.mean, config.std);
  }
  Ok(())
}

/// 裁剪、缩放并编码一个候选区域
///
/// 裁剪图在缩放完成后立即释放，缩放图在编码后释放，
/// 同一时刻最多各存在一张。
pub fn prepare<const W: u32, const H: u32>(
  frame: &RgbImage,
  bbox: &BoundingBox,
  background: Rgb<u8>,
  tensor: &mut NhwcTensor<W, H>,
  config: &ClassifierConfig,
) -> Result<(), PreprocessError> {
  let _span = debug_span!("preprocess").entered();

  let resized = {
    let cropped = crop(frame, bbox, background)?;
    debug!("裁剪区域尺寸: {}x{}", cropped.width(), cropped.height());
    resize(&cropped, W, H)
  };
  encode(&resized, tensor, config)
}
