// 该文件是 Lupai （路牌） 项目的一部分。
// src/frame.rs - NHWC 输入张量定义
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

use crate::config::BATCH_SIZE;

const RGB_CHANNELS: usize = 3;

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  /// 量化模型，每通道 1 字节
  UInt8,
  /// 浮点模型，每通道 4 字节
  Float32,
}

impl TensorType {
  pub fn bytes_per_channel(self) -> usize {
    match self {
      TensorType::UInt8 => 1,
      TensorType::Float32 => 4,
    }
  }
}

#[derive(Debug, Clone)]
enum TensorData {
  UInt8(Box<[u8]>),
  Float32(Box<[f32]>),
}

/// 形状为 `[1, H, W, 3]` 的分类器输入张量
///
/// 写入通过内部游标顺序进行，每次编码前需要 [`NhwcTensor::rewind`]。
#[derive(Debug, Clone)]
pub struct NhwcTensor<const W: u32, const H: u32> {
  data: TensorData,
  cursor: usize,
}

impl<const W: u32, const H: u32> NhwcTensor<W, H> {
  pub fn new(quantized: bool) -> Self {
    let size = Self::element_count();
    let data = if quantized {
      TensorData::UInt8(vec![0u8; size].into_boxed_slice())
    } else {
      TensorData::Float32(vec![0f32; size].into_boxed_slice())
    };
    Self { data, cursor: 0 }
  }

  fn element_count() -> usize {
    BATCH_SIZE * (H as usize) * (W as usize) * RGB_CHANNELS
  }

  pub fn shape(&self) -> [usize; 4] {
    [BATCH_SIZE, H as usize, W as usize, RGB_CHANNELS]
  }

  pub fn tensor_type(&self) -> TensorType {
    match self.data {
      TensorData::UInt8(_) => TensorType::UInt8,
      TensorData::Float32(_) => TensorType::Float32,
    }
  }

  pub fn is_quantized(&self) -> bool {
    self.tensor_type() == TensorType::UInt8
  }

  /// 元素个数
  pub fn len(&self) -> usize {
    Self::element_count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 字节长度，恒为 `H * W * 3 * bytes_per_channel`
  pub fn byte_len(&self) -> usize {
    self.len() * self.tensor_type().bytes_per_channel()
  }

  /// 将写入游标回到起点
  pub fn rewind(&mut self) {
    self.cursor = 0;
  }

  /// 已写入的元素个数
  pub fn position(&self) -> usize {
    self.cursor
  }

  /// 写入一个通道值：量化张量保留原始字节，浮点张量写入 `(value - mean) / std`
  pub(crate) fn put_channel(&mut self, value: u8, mean: f32, std: f32) {
    debug_assert!(self.cursor < self.len(), "张量写入越界");
    match &mut self.data {
      TensorData::UInt8(data) => data[self.cursor] = value,
      TensorData::Float32(data) => data[self.cursor] = (value as f32 - mean) / std,
    }
    self.cursor += 1;
  }

  /// 按本机字节序查看底层缓冲区
  pub fn as_bytes(&self) -> &[u8] {
    match &self.data {
      TensorData::UInt8(data) => data,
      TensorData::Float32(data) => bytemuck::cast_slice(data),
    }
  }

  /// 与尺寸无关的只读视图，供推理后端使用
  pub fn view(&self) -> TensorView<'_> {
    let data = match &self.data {
      TensorData::UInt8(data) => TensorSlice::UInt8(data),
      TensorData::Float32(data) => TensorSlice::Float32(data),
    };
    TensorView {
      shape: self.shape(),
      data,
    }
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match &self.data {
      TensorData::UInt8(data) => Some(data),
      TensorData::Float32(_) => None,
    }
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::UInt8(_) => None,
      TensorData::Float32(data) => Some(data),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub enum TensorSlice<'a> {
  UInt8(&'a [u8]),
  Float32(&'a [f32]),
}

/// 张量的借用视图
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  pub shape: [usize; 4],
  pub data: TensorSlice<'a>,
}

impl<'a> TensorView<'a> {
  pub fn as_bytes(&self) -> &'a [u8] {
    match self.data {
      TensorSlice::UInt8(data) => data,
      TensorSlice::Float32(data) => bytemuck::cast_slice(data),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn byte_length_follows_element_type() {
    let float: NhwcTensor<4, 2> = NhwcTensor::new(false);
    assert_eq!(float.shape(), [1, 2, 4, 3]);
    assert_eq!(float.byte_len(), 2 * 4 * 3 * 4);
    assert_eq!(float.as_bytes().len(), float.byte_len());

    let quant: NhwcTensor<4, 2> = NhwcTensor::new(true);
    assert_eq!(quant.byte_len(), 2 * 4 * 3);
    assert!(quant.is_quantized());
  }

  #[test]
  fn rewind_restarts_writes() {
    let mut tensor: NhwcTensor<1, 1> = NhwcTensor::new(false);
    tensor.put_channel(255, 0.0, 255.0);
    tensor.put_channel(0, 0.0, 255.0);
    assert_eq!(tensor.position(), 2);

    tensor.rewind();
    assert_eq!(tensor.position(), 0);
    tensor.put_channel(51, 0.0, 255.0);
    let data = tensor.as_f32().unwrap();
    assert!((data[0] - 0.2).abs() < 1e-6);
    assert_eq!(data[1], 0.0);
  }
}
