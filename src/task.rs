// 该文件是 Dianyun （点云） 项目的一部分。
// src/task.rs - 评估任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use tracing::{debug, info, warn};

use crate::{
  FromConfig,
  config::EvalConfig,
  dataset::{Dataset, DatasetError, ScanSample},
  dist::{DistContext, DistributedSampler},
  metric::MeanIoU,
  model::{Logits, Model},
  output::Render,
  remap::{ScenePrediction, remap_batch},
  sparse::{SparseTensor, collate},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 安装 Ctrl-C 处理，返回共享的停止标志
pub fn install_stop_handler() -> anyhow::Result<Arc<AtomicBool>> {
  let stop = Arc::new(AtomicBool::new(false));
  let flag = stop.clone();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理")?;

  Ok(stop)
}

/// 逐批推理、回投、统计并输出
#[derive(Debug, Clone)]
pub struct EvaluationTask {
  metric: MeanIoU,
  batch_size: usize,
  log_interval: usize,
  stop: Option<Arc<AtomicBool>>,
  ctx: DistContext,
}

impl EvaluationTask {
  pub fn new(metric: MeanIoU) -> Self {
    Self {
      metric,
      batch_size: 1,
      log_interval: 100,
      stop: None,
      ctx: DistContext::single(),
    }
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  /// 0 表示只在结束时打印进度
  pub fn with_log_interval(mut self, log_interval: usize) -> Self {
    self.log_interval = log_interval;
    self
  }

  pub fn with_stop_flag(mut self, stop: Option<Arc<AtomicBool>>) -> Self {
    self.stop = stop;
    self
  }

  pub fn with_dist(mut self, ctx: DistContext) -> Self {
    self.ctx = ctx;
    self
  }

  fn should_stop(&self) -> bool {
    self
      .stop
      .as_ref()
      .is_some_and(|stop| stop.load(Ordering::SeqCst))
  }
}

impl FromConfig for EvaluationTask {
  type Error = std::convert::Infallible;

  fn from_config(config: &EvalConfig) -> Result<Self, Self::Error> {
    let metric = MeanIoU::from_config(config)?;
    Ok(
      Self::new(metric)
        .with_batch_size(config.eval.batch_size)
        .with_log_interval(config.eval.log_interval),
    )
  }
}

/// 处理一个批次，返回完成的场景数
fn run_batch<M, O>(
  model: &M,
  output: &O,
  metric: &mut MeanIoU,
  samples: &[ScanSample],
) -> anyhow::Result<usize>
where
  M: Model<Input = SparseTensor<f32>, Output = Logits>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<ScenePrediction>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let batch = collate(samples);
  debug!(
    "批次: {} 个场景, {} 个体素, {} 个点",
    batch.num_scenes(),
    batch.lidar.len(),
    batch.inverse_map.len()
  );

  let logits = model
    .infer(&batch.lidar)
    .with_context(|| format!("推理失败: {:?}", batch.file_names))?;
  let predictions = remap_batch(&batch, &logits)?;

  for prediction in &predictions {
    metric.after_step(&prediction.outputs, &prediction.targets);
    output
      .render_result(prediction)
      .with_context(|| format!("输出失败: {}", prediction.file_name.display()))?;
  }

  Ok(predictions.len())
}

impl<I, M, O> Task<I, M, O> for EvaluationTask
where
  I: Iterator<Item = Result<ScanSample, DatasetError>>,
  M: Model<Input = SparseTensor<f32>, Output = Logits>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<ScenePrediction>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = MeanIoU;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    let rank = self.ctx.rank();
    let total = input.size_hint().0;
    let mut metric = self.metric.clone();
    info!("[{}] 开始评估, 共 {} 帧", rank, total);

    let started = Instant::now();
    let mut processed = 0usize;
    loop {
      if self.should_stop() {
        warn!("[{}] 中断信号接收，在 {} / {} 帧处退出评估", rank, processed, total);
        break;
      }

      let samples = input
        .by_ref()
        .take(self.batch_size)
        .collect::<Result<Vec<_>, _>>()?;
      if samples.is_empty() {
        break;
      }

      let before = processed;
      processed += run_batch(&model, &output, &mut metric, &samples)?;

      let crossed = self.log_interval > 0 && processed / self.log_interval > before / self.log_interval;
      if crossed || processed == total {
        info!(
          "[{}] 进度 {} / {}, 耗时: {:.2?}",
          rank,
          processed,
          total,
          started.elapsed()
        );
      }
    }

    info!("[{}] 评估完成, 共 {} 帧, 耗时: {:.2?}", rank, processed, started.elapsed());
    Ok(metric)
  }
}

/// 在 `size` 个副本上并行评估，每个副本各自构建模型，最后汇总指标
pub fn evaluate_distributed<D, M, E, F, O>(
  dataset: &D,
  size: usize,
  build_model: F,
  output: &O,
  task: &EvaluationTask,
) -> anyhow::Result<MeanIoU>
where
  D: Dataset + Sync + ?Sized,
  F: Fn(DistContext) -> Result<M, E> + Sync,
  E: Into<anyhow::Error>,
  M: Model<Input = SparseTensor<f32>, Output = Logits>,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<ScenePrediction> + Sync,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let group = DistContext::group(size);
  info!("启动 {} 个评估副本, 数据集共 {} 帧", group.len(), dataset.len());

  let metrics = thread::scope(|scope| {
    let handles: Vec<_> = group
      .into_iter()
      .map(|ctx| {
        let build_model = &build_model;
        let task = task.clone().with_dist(ctx);
        scope.spawn(move || -> anyhow::Result<MeanIoU> {
          let model = build_model(ctx).map_err(|e| {
            Into::<anyhow::Error>::into(e).context(format!("副本 {} 模型构建失败", ctx.rank()))
          })?;
          let sampler = DistributedSampler::new(dataset.len(), ctx);
          debug!("副本 {} 分得 {} 帧", ctx.rank(), sampler.num_samples());
          task.run_task(sampler.iter(dataset), model, output)
        })
      })
      .collect();

    handles
      .into_iter()
      .map(|handle| {
        handle
          .join()
          .map_err(|_| anyhow!("评估副本线程异常退出"))
          .and_then(|result| result)
      })
      .collect::<anyhow::Result<Vec<_>>>()
  })?;

  let mut metrics = metrics.into_iter();
  let mut merged = metrics.next().ok_or_else(|| anyhow!("没有评估副本"))?;
  for metric in metrics {
    merged.merge(&metric);
  }
  Ok(merged)
}
