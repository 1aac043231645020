// 该文件是 Dianyun （点云） 项目的一部分。
// src/bin/evaluate.rs - 点云语义分割离线评估
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use dianyun::{
  FromConfig, checkpoint,
  config::{EvalConfig, parse_overrides},
  dataset::{Dataset, SemanticKitti},
  metric::IoUReport,
  model::{ModelKind, RknnSegmentorBuilder},
  output::OutputWrapper,
  run_dir,
  task::{EvaluationTask, evaluate_distributed, install_stop_handler},
};

/// Dianyun 评估参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// YAML 配置文件
  #[arg(value_name = "CONFIG")]
  pub config: PathBuf,

  /// 运行目录，缺省时使用 runs/run-<时间戳>
  #[arg(long, value_name = "DIR")]
  pub run_dir: Option<PathBuf>,

  /// 模型名称，按关键字选择结构（spvnas / spvcnn / mink）
  #[arg(long, value_name = "NAME")]
  pub name: String,

  /// 预测标签输出目录，缺省时只计算指标
  #[arg(long, value_name = "DIR")]
  pub save_dir: Option<PathBuf>,

  /// 配置覆盖项，写在 `--` 之后，例如 `-- --dataset.root /data/kitti`
  #[arg(last = true, value_name = "OPTS")]
  pub opts: Vec<String>,
}

#[derive(Serialize)]
struct Summary<'a> {
  name: &'a str,
  model: &'static str,
  checkpoint: &'a PathBuf,
  num_replicas: usize,
  num_scans: usize,
  report: &'a IoUReport,
}

fn main() -> Result<()> {
  let args = Args::parse();

  let run_dir = match &args.run_dir {
    Some(dir) => run_dir::set_run_dir(dir)?,
    None => run_dir::auto_set_run_dir()?,
  };
  run_dir::init_logging(&run_dir)?;

  info!("运行目录: {}", run_dir.display());
  info!("命令行: {}", std::env::args().collect::<Vec<_>>().join(" "));

  let overrides = parse_overrides(&args.opts)?;
  let config = EvalConfig::load(&args.config, true, &overrides)
    .with_context(|| format!("无法加载配置: {}", args.config.display()))?;
  info!("配置: {}", serde_json::to_string_pretty(&config)?);

  let kind = ModelKind::from_name(&args.name)?;
  info!("模型结构: {}", kind.as_str());

  let dataset = SemanticKitti::from_config(&config)?;
  if dataset.is_empty() {
    warn!("数据集为空: {}", config.dataset.root.display());
  }

  let checkpoint = checkpoint::restore(&run_dir, &config.model.pretrained_dir, &args.name)?;

  let raw_labels = config
    .submission
    .raw_labels
    .then(|| dataset.label_map().clone());
  let output = OutputWrapper::from_save_dir(args.save_dir.as_deref(), raw_labels)?;
  match &args.save_dir {
    Some(dir) => info!("预测标签输出目录: {}", dir.display()),
    None => info!("未指定输出目录, 只计算指标"),
  }

  let replicas = if config.distributed {
    config.num_replicas.max(1)
  } else {
    1
  };

  let stop = install_stop_handler()?;
  let task = EvaluationTask::from_config(&config)?.with_stop_flag(Some(stop));

  let metric = evaluate_distributed(
    &dataset,
    replicas,
    |ctx| {
      info!("副本 {} / {} 加载模型", ctx.rank(), ctx.size());
      RknnSegmentorBuilder::new(checkpoint.clone(), kind)
        .num_classes(config.data.num_classes)
        .max_voxels(config.model.max_voxels)
        .build()
    },
    &output,
    &task,
  )?;

  let report = metric.after_epoch(dataset.label_map().class_names());
  for class in &report.classes {
    info!(
      "{:>14}: {:.2}",
      class.name.as_deref().unwrap_or("-"),
      class.iou * 100.0
    );
  }
  info!("mIoU: {:.2} ({} 个有效点)", report.miou, report.num_points);

  run_dir::write_summary(
    &run_dir,
    &Summary {
      name: &args.name,
      model: kind.as_str(),
      checkpoint: &checkpoint,
      num_replicas: replicas,
      num_scans: dataset.len(),
      report: &report,
    },
  )?;

  Ok(())
}
