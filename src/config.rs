// 该文件是 Lupai （路牌） 项目的一部分。
// src/config.rs - 级联参数配置
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

use image::Rgb;

/// 候选区域进入分类阶段的最低检测置信度（含边界）
pub const THRESHOLD_SCORE: f32 = 0.8;
/// 路牌分类模型的输入边长
pub const SIGN_CLASSIFIER_INPUT_SIZE: u32 = 224;
/// 路牌分类模型是否为量化模型
pub const SIGN_CLASSIFIER_IS_QUANTIZED: bool = false;
/// 参考模型（GTSRB）的类别数
pub const SIGN_CLASSIFIER_NUM_CLASSES: usize = 43;
pub const IMAGE_MEAN: f32 = 0.0;
pub const IMAGE_STD: f32 = 255.0;
pub const BATCH_SIZE: usize = 1;
/// 裁剪时越界区域的填充颜色（不透明白色）
pub const CROP_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
/// 裁剪面积相对源帧面积的上限倍数，超过时丢弃该候选区域
pub const MAX_CROP_AREA_RATIO: u64 = 16;

/// 分类器输入编码参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
  pub quantized: bool,
  pub mean: f32,
  pub std: f32,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      quantized: SIGN_CLASSIFIER_IS_QUANTIZED,
      mean: IMAGE_MEAN,
      std: IMAGE_STD,
    }
  }
}

/// 级联参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeConfig {
  pub threshold: f32,
  pub background: Rgb<u8>,
}

impl Default for CascadeConfig {
  fn default() -> Self {
    Self {
      threshold: THRESHOLD_SCORE,
      background: CROP_BACKGROUND,
    }
  }
}
