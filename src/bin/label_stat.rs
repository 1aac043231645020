// 该文件是 Dianyun （点云） 项目的一部分。
// src/bin/label_stat.rs - 标签文件统计
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

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{info, warn};

use dianyun::{
  dataset::{LabelMap, read_scan},
  label::{decode, read_label_file},
};

/// 统计 `.label` 文件中各类别的点数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// `.label` 文件
  #[arg(value_name = "LABEL")]
  pub label: PathBuf,

  /// 对应的 `.bin` 点云，用于核对点数
  #[arg(long, value_name = "SCAN")]
  pub scan: Option<PathBuf>,

  /// 标签为原始 SemanticKITTI id 而非类别下标
  #[arg(long)]
  pub raw: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let labels = read_label_file(&args.label)?;
  info!("标签文件: {}, 共 {} 个点", args.label.display(), labels.len());

  let label_map = LabelMap::semantic_kitti(255);
  let mut histogram: BTreeMap<u16, usize> = BTreeMap::new();
  let mut with_instance = 0usize;
  for &label in &labels {
    let (semantic, instance) = decode(label);
    *histogram.entry(semantic).or_default() += 1;
    if instance != 0 {
      with_instance += 1;
    }
  }

  for (&semantic, &count) in &histogram {
    let class = if args.raw {
      label_map.map(semantic as u32) as usize
    } else {
      semantic as usize
    };
    info!(
      "{:>5} {:>14}: {:>8} ({:.2}%)",
      semantic,
      label_map.class_name(class).unwrap_or("-"),
      count,
      count as f64 / labels.len().max(1) as f64 * 100.0
    );
  }
  if with_instance > 0 {
    warn!("{} 个点带有实例标签", with_instance);
  }

  if let Some(scan) = &args.scan {
    let points = read_scan(scan)?;
    if points.len() != labels.len() {
      bail!(
        "点数不一致: 点云 {} 个, 标签 {} 个",
        points.len(),
        labels.len()
      );
    }
    info!("点数与点云一致: {}", points.len());
  }

  Ok(())
}
