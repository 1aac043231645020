// 该文件是 Dianyun （点云） 项目的一部分。
// src/remap.rs - 体素预测回投到原始点
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

use thiserror::Error;
use tracing::debug;

use crate::{model::Logits, sparse::SparseBatch};

#[derive(Error, Debug)]
pub enum RemapError {
  #[error("得分行数 {0} 与体素数 {1} 不一致")]
  RowMismatch(usize, usize),
  #[error("场景 {0} 的逆映射下标 {1} 超出体素数 {2}")]
  InverseOutOfRange(usize, u32, usize),
  #[error("场景 {0} 没有对应的文件名")]
  MissingFileName(usize),
}

/// 单个场景逐点的预测与真值
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePrediction {
  pub file_name: PathBuf,
  pub outputs: Vec<u32>,
  pub targets: Vec<u32>,
}

impl ScenePrediction {
  pub fn num_points(&self) -> usize {
    self.outputs.len()
  }
}

/// 逐场景取体素得分的 argmax，再按逆映射散射回原始点
pub fn remap_batch(batch: &SparseBatch, logits: &Logits) -> Result<Vec<ScenePrediction>, RemapError> {
  if logits.rows() != batch.lidar.len() {
    return Err(RemapError::RowMismatch(logits.rows(), batch.lidar.len()));
  }

  // 每个输入场景一项，没有点的场景也输出空预测
  let num_scenes = batch.num_scenes();

  let mut scene_rows: Vec<Vec<usize>> = vec![Vec::new(); num_scenes];
  for row in 0..batch.lidar.len() {
    if let Some(rows) = scene_rows.get_mut(batch.lidar.batch_of(row) as usize) {
      rows.push(row);
    }
  }

  let mut predictions: Vec<ScenePrediction> = batch
    .file_names
    .iter()
    .map(|file_name| ScenePrediction {
      file_name: file_name.clone(),
      outputs: Vec::new(),
      targets: Vec::new(),
    })
    .collect();

  for (point, &inv) in batch.inverse_map.feats().iter().enumerate() {
    let scene = batch.inverse_map.batch_of(point) as usize;
    let rows = scene_rows
      .get(scene)
      .ok_or(RemapError::MissingFileName(scene))?;
    let row = *rows
      .get(inv as usize)
      .ok_or(RemapError::InverseOutOfRange(scene, inv, rows.len()))?;
    predictions[scene].outputs.push(logits.argmax(row));
  }

  for (point, &target) in batch.targets_mapped.feats().iter().enumerate() {
    let scene = batch.targets_mapped.batch_of(point) as usize;
    if let Some(prediction) = predictions.get_mut(scene) {
      prediction.targets.push(target);
    }
  }

  debug!(
    "回投完成: {} 个场景, {} 个点",
    num_scenes,
    batch.inverse_map.len()
  );
  Ok(predictions)
}
