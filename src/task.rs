// 该文件是 Lupai （路牌） 项目的一部分。
// src/task.rs - 识别任务
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

use std::{thread, time::Duration};
use tracing::{info, warn};

use crate::{
  cascade::{Cascade, RecognizedObject},
  input::Frame,
  output::Render,
  proposal::RegionProposer,
};

pub trait Task<I, C, O>: Sized {
  type Error;
  fn run_task(self, input: I, cascade: C, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Frame>,
  P: RegionProposer,
  O: Render<Frame, [RecognizedObject], Error = RE>,
  const W: u32,
  const H: u32,
> Task<I, Cascade<P, W, H>, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut cascade: Cascade<P, W, H>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始识别...");
    cascade.select_frame(&frame.name, frame.index);
    let now = std::time::Instant::now();
    let result = cascade.run_borrowed(&frame.image)?;
    let elapsed = now.elapsed();
    info!("识别完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复识别，统计平均耗时
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Frame>,
  P: RegionProposer,
  O: Render<Frame, [RecognizedObject], Error = RE>,
  const W: u32,
  const H: u32,
> Task<I, Cascade<P, W, H>, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut cascade: Cascade<P, W, H>, output: O) -> Result<(), Self::Error> {
    // 前两次作为预热不计入平均
    const WARMUP: usize = 2;

    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始识别...");
    cascade.select_frame(&frame.name, frame.index);
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = std::time::Instant::now();
      let result = cascade.run_borrowed(&frame.image)?;
      let elapsed = now.elapsed();
      info!("({})识别完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    if times.len() > WARMUP {
      warn!(
        "平均识别时间: {:.2?}",
        times.iter().skip(WARMUP).sum::<Duration>() / (times.len() - WARMUP) as u32
      );
    } else {
      warn!("重复次数不足 {} 次，不统计平均识别时间", WARMUP + 1);
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Frame>,
  P: RegionProposer,
  O: Render<Frame, [RecognizedObject], Error = RE>,
  const W: u32,
  const H: u32,
> Task<I, Cascade<P, W, H>, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut cascade: Cascade<P, W, H>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，当前帧处理完后退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_count = 0usize;
    let mut total_recognized = 0usize;
    let mut now = std::time::Instant::now();
    for frame in input {
      frame_count += 1;
      info!("处理第 {} 帧图像: {}", frame_count, frame.name);
      cascade.select_frame(&frame.name, frame.index);
      let result = cascade.run_borrowed(&frame.image)?;
      let elapsed_a = now.elapsed();
      total_recognized += result.len();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = std::time::Instant::now();
      info!("识别完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共 {} 帧，识别 {} 个路牌", frame_count, total_recognized);
    Ok(())
  }
}
