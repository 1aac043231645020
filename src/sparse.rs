// 该文件是 Dianyun （点云） 项目的一部分。
// src/sparse.rs - 稀疏张量与批次拼接
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

use crate::dataset::ScanSample;

/// 坐标中场景索引所在的列
pub const BATCH_AXIS: usize = 3;

/// 稀疏张量：每行特征对应一个坐标 `[x, y, z, batch]`
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor<T> {
  feats: Vec<T>,
  coords: Vec<[i32; 4]>,
  channels: usize,
}

impl<T: Copy> SparseTensor<T> {
  pub fn new(feats: Vec<T>, coords: Vec<[i32; 4]>, channels: usize) -> Self {
    if feats.len() != coords.len() * channels {
      panic!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        coords.len() * channels,
        feats.len()
      );
    }

    Self {
      feats,
      coords,
      channels,
    }
  }

  /// 由三维坐标构造，场景索引置 0
  pub fn from_xyz(feats: Vec<T>, xyz: &[[i32; 3]], channels: usize) -> Self {
    let coords = xyz.iter().map(|c| [c[0], c[1], c[2], 0]).collect();
    Self::new(feats, coords, channels)
  }

  pub fn len(&self) -> usize {
    self.coords.len()
  }

  pub fn is_empty(&self) -> bool {
    self.coords.is_empty()
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn feats(&self) -> &[T] {
    &self.feats
  }

  pub fn coords(&self) -> &[[i32; 4]] {
    &self.coords
  }

  pub fn row(&self, index: usize) -> &[T] {
    &self.feats[index * self.channels..(index + 1) * self.channels]
  }

  pub fn batch_of(&self, index: usize) -> i32 {
    self.coords[index][BATCH_AXIS]
  }

  /// 最大场景索引，空张量返回 None
  pub fn max_batch(&self) -> Option<i32> {
    self.coords.iter().map(|c| c[BATCH_AXIS]).max()
  }

  fn extend_with_batch(&mut self, other: &SparseTensor<T>, batch: i32) {
    self.feats.extend_from_slice(&other.feats);
    self
      .coords
      .extend(other.coords.iter().map(|c| [c[0], c[1], c[2], batch]));
  }

  fn empty(channels: usize) -> Self {
    Self {
      feats: Vec::new(),
      coords: Vec::new(),
      channels,
    }
  }
}

/// 多个场景拼接成的批次
#[derive(Debug, Clone)]
pub struct SparseBatch {
  /// 体素特征，送入模型
  pub lidar: SparseTensor<f32>,
  /// 每个原始点所属体素（场景内下标）
  pub inverse_map: SparseTensor<u32>,
  /// 每个原始点的映射后真值
  pub targets_mapped: SparseTensor<u32>,
  pub file_names: Vec<PathBuf>,
}

impl SparseBatch {
  pub fn num_scenes(&self) -> usize {
    self.file_names.len()
  }
}

/// 拼接样本，坐标最后一列改写为样本在批次中的位置
pub fn collate(samples: &[ScanSample]) -> SparseBatch {
  let channels = samples.first().map(|s| s.lidar.channels()).unwrap_or(4);

  let mut lidar = SparseTensor::empty(channels);
  let mut inverse_map = SparseTensor::empty(1);
  let mut targets_mapped = SparseTensor::empty(1);
  let mut file_names = Vec::with_capacity(samples.len());

  for (batch, sample) in samples.iter().enumerate() {
    let batch = batch as i32;
    lidar.extend_with_batch(&sample.lidar, batch);
    inverse_map.extend_with_batch(&sample.inverse_map, batch);
    targets_mapped.extend_with_batch(&sample.targets_mapped, batch);
    file_names.push(sample.file_name.clone());
  }

  SparseBatch {
    lidar,
    inverse_map,
    targets_mapped,
    file_names,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample(name: &str, voxels: usize, points: usize) -> ScanSample {
    let xyz: Vec<[i32; 3]> = (0..voxels as i32).map(|i| [i, 0, 0]).collect();
    let point_xyz: Vec<[i32; 3]> = (0..points as i32).map(|i| [i, 1, 0]).collect();
    ScanSample {
      file_name: PathBuf::from(name),
      lidar: SparseTensor::from_xyz(vec![0.5; voxels * 4], &xyz, 4),
      inverse_map: SparseTensor::from_xyz(
        (0..points as u32).map(|p| p % voxels as u32).collect(),
        &point_xyz,
        1,
      ),
      targets_mapped: SparseTensor::from_xyz(vec![1; points], &point_xyz, 1),
    }
  }

  #[test]
  fn collate_assigns_scene_index() {
    let batch = collate(&[sample("a", 2, 5), sample("b", 3, 4)]);

    assert_eq!(batch.num_scenes(), 2);
    assert_eq!(batch.lidar.len(), 5);
    assert_eq!(batch.inverse_map.len(), 9);
    assert_eq!(batch.lidar.feats().len(), 20);
    assert_eq!(batch.lidar.batch_of(1), 0);
    assert_eq!(batch.lidar.batch_of(2), 1);
    assert_eq!(batch.inverse_map.max_batch(), Some(1));
    assert_eq!(batch.targets_mapped.batch_of(8), 1);
  }

  #[test]
  fn rows_follow_channel_width() {
    let t = SparseTensor::from_xyz(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[[0, 0, 0], [1, 0, 0]], 3);
    assert_eq!(t.row(1), &[4.0, 5.0, 6.0]);
    assert_eq!(t.coords()[1], [1, 0, 0, 0]);
  }

  #[test]
  #[should_panic]
  fn mismatched_feature_length_panics() {
    let _ = SparseTensor::from_xyz(vec![1.0f32; 3], &[[0, 0, 0]], 4);
  }
}
