// 该文件是 Dianyun （点云） 项目的一部分。
// src/dataset.rs - 点云数据集
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

use crate::{
  sparse::SparseTensor,
  voxel::{VoxelError, sparse_quantize, voxel_coords},
};

mod label_map;
mod semantic_kitti;

pub use self::label_map::LabelMap;
pub use self::semantic_kitti::{SemanticKitti, Split, read_scan};

/// 点特征维度：x, y, z, intensity
pub const POINT_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("I/O 错误: {0}, 路径: {1}")]
  IoError(std::io::Error, PathBuf),
  #[error("点云文件长度 {0} 不是 16 的整数倍: {1}")]
  TruncatedScan(usize, PathBuf),
  #[error("标签数量 {0} 与点数 {1} 不一致: {2}")]
  LabelCountMismatch(usize, usize, PathBuf),
  #[error("标签文件错误: {0}")]
  LabelError(#[from] crate::label::LabelError),
  #[error("体素化失败: {0}, 路径: {1}")]
  VoxelError(VoxelError, PathBuf),
  #[error("未知的数据划分: {0}")]
  UnknownSplit(String),
  #[error("未知的数据集: {0}")]
  UnknownDataset(String),
  #[error("样本下标越界: {0} / {1}")]
  IndexOutOfRange(usize, usize),
}

/// 单帧扫描经过体素化后的样本
#[derive(Debug, Clone)]
pub struct ScanSample {
  pub file_name: PathBuf,
  /// 体素特征（每个体素取其第一个点）
  pub lidar: SparseTensor<f32>,
  /// 原始点 -> 体素
  pub inverse_map: SparseTensor<u32>,
  /// 原始点的映射后真值
  pub targets_mapped: SparseTensor<u32>,
}

impl ScanSample {
  /// 体素化一帧点云，`labels` 为映射后的逐点真值
  pub fn voxelize(
    file_name: PathBuf,
    points: &[[f32; 4]],
    labels: Vec<u32>,
    voxel_size: f32,
  ) -> Result<Self, DatasetError> {
    if labels.len() != points.len() {
      return Err(DatasetError::LabelCountMismatch(
        labels.len(),
        points.len(),
        file_name,
      ));
    }

    let coords = voxel_coords(points, voxel_size)
      .and_then(|coords| sparse_quantize(&coords).map(|q| (coords, q)));
    let (coords, quantized) = match coords {
      Ok(result) => result,
      Err(e) => return Err(DatasetError::VoxelError(e, file_name)),
    };

    let voxel_xyz: Vec<[i32; 3]> = quantized.indices.iter().map(|&i| coords[i]).collect();
    let feats: Vec<f32> = quantized
      .indices
      .iter()
      .flat_map(|&i| points[i])
      .collect();

    Ok(Self {
      lidar: SparseTensor::from_xyz(feats, &voxel_xyz, POINT_CHANNELS),
      inverse_map: SparseTensor::from_xyz(quantized.inverse, &coords, 1),
      targets_mapped: SparseTensor::from_xyz(labels, &coords, 1),
      file_name,
    })
  }

  pub fn num_points(&self) -> usize {
    self.inverse_map.len()
  }

  pub fn num_voxels(&self) -> usize {
    self.lidar.len()
  }
}

/// 可随机访问的数据集
pub trait Dataset {
  fn len(&self) -> usize;

  fn get(&self, index: usize) -> Result<ScanSample, DatasetError>;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 按下标顺序读取样本
pub struct DatasetIter<'a, D: ?Sized> {
  dataset: &'a D,
  indices: std::vec::IntoIter<usize>,
}

impl<'a, D: Dataset + ?Sized> DatasetIter<'a, D> {
  pub fn new(dataset: &'a D, indices: Vec<usize>) -> Self {
    Self {
      dataset,
      indices: indices.into_iter(),
    }
  }
}

impl<D: Dataset + ?Sized> Iterator for DatasetIter<'_, D> {
  type Item = Result<ScanSample, DatasetError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.indices.next().map(|i| self.dataset.get(i))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.indices.size_hint()
  }
}
