// 该文件是 Dianyun （点云） 项目的一部分。
// src/checkpoint.rs - 检查点恢复
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const MODEL_EXTENSION: &str = "rknn";
const STEP_PREFIX: &str = "step-";

#[derive(Error, Debug)]
pub enum CheckpointError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("找不到检查点, 已查找: {0:?}")]
  NotFound(Vec<PathBuf>),
}

/// `step-<N>.rknn` 中的 N
fn step_of(path: &Path) -> Option<u64> {
  if path.extension()? != MODEL_EXTENSION {
    return None;
  }
  path
    .file_stem()?
    .to_str()?
    .strip_prefix(STEP_PREFIX)?
    .parse()
    .ok()
}

/// 运行目录中步数最大的检查点
pub fn latest_checkpoint(run_dir: &Path) -> Result<Option<PathBuf>, CheckpointError> {
  let directory = run_dir.join(CHECKPOINT_DIR);
  if !directory.is_dir() {
    return Ok(None);
  }

  let mut latest: Option<(u64, PathBuf)> = None;
  for entry in std::fs::read_dir(&directory)? {
    let path = entry?.path();
    if let Some(step) = step_of(&path)
      && latest.as_ref().is_none_or(|(best, _)| step > *best)
    {
      latest = Some((step, path));
    }
  }

  Ok(latest.map(|(_, path)| path))
}

/// 优先恢复训练检查点，否则回退到预训练模型
pub fn restore(
  run_dir: &Path,
  pretrained_dir: &Path,
  name: &str,
) -> Result<PathBuf, CheckpointError> {
  if let Some(path) = latest_checkpoint(run_dir)? {
    info!("恢复检查点: {}", path.display());
    return Ok(path);
  }

  let checkpoint_dir = run_dir.join(CHECKPOINT_DIR);
  warn!("没有找到检查点: {}", checkpoint_dir.display());

  let pretrained = pretrained_dir.join(format!("{}.{}", name, MODEL_EXTENSION));
  if pretrained.is_file() {
    info!("使用预训练模型: {}", pretrained.display());
    return Ok(pretrained);
  }

  Err(CheckpointError::NotFound(vec![checkpoint_dir, pretrained]))
}
