// 该文件是 Dianyun （点云） 项目的一部分。
// src/voxel.rs - 稀疏体素量化
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

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoxelError {
  #[error("体素大小无效: {0}")]
  InvalidVoxelSize(f32),
  #[error("第 {0} 个点的坐标不是有限值")]
  NonFinitePoint(usize),
  #[error("第 {0} 个点的体素坐标超出 i32 范围")]
  CoordinateOverflow(usize),
  #[error("体素网格尺寸 {0:?} 超出哈希范围")]
  HashOverflow([u64; 3]),
}

/// 量化结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantized {
  /// 每个体素对应的第一个原始点
  pub indices: Vec<usize>,
  /// 每个原始点所属的体素
  pub inverse: Vec<u32>,
}

impl Quantized {
  pub fn num_voxels(&self) -> usize {
    self.indices.len()
  }
}

/// 将整数坐标展平为 u64 键，坐标先平移到非负
pub fn ravel_hash(coords: &[[i32; 3]]) -> Result<Vec<u64>, VoxelError> {
  if coords.is_empty() {
    return Ok(Vec::new());
  }

  let mut min = [i32::MAX; 3];
  for c in coords {
    for axis in 0..3 {
      min[axis] = min[axis].min(c[axis]);
    }
  }

  let shifted = |c: &[i32; 3], axis: usize| (c[axis] as i64 - min[axis] as i64) as u64;

  let mut extent = [0u64; 3];
  for c in coords {
    for axis in 0..3 {
      extent[axis] = extent[axis].max(shifted(c, axis) + 1);
    }
  }

  // 网格总大小放得下 u64 时，每个键都小于它
  extent
    .iter()
    .try_fold(1u64, |acc, &e| acc.checked_mul(e))
    .ok_or(VoxelError::HashOverflow(extent))?;

  Ok(
    coords
      .iter()
      .map(|c| {
        let mut key = 0u64;
        for axis in 0..2 {
          key += shifted(c, axis);
          key *= extent[axis + 1];
        }
        key + shifted(c, 2)
      })
      .collect(),
  )
}

/// 按哈希键排序去重，返回体素代表点与逆映射
pub fn sparse_quantize(coords: &[[i32; 3]]) -> Result<Quantized, VoxelError> {
  let keys = ravel_hash(coords)?;

  // 稳定排序保证同一体素中下标最小的点排在前面
  let mut order: Vec<usize> = (0..keys.len()).collect();
  order.sort_by_key(|&i| keys[i]);

  let mut indices = Vec::new();
  let mut inverse = vec![0u32; keys.len()];
  let mut last = None;
  for &point in &order {
    if last != Some(keys[point]) {
      indices.push(point);
      last = Some(keys[point]);
    }
    inverse[point] = (indices.len() - 1) as u32;
  }

  Ok(Quantized { indices, inverse })
}

/// `round(xyz / voxel_size)`，再减去每个轴上的最小值
pub fn voxel_coords(points: &[[f32; 4]], voxel_size: f32) -> Result<Vec<[i32; 3]>, VoxelError> {
  if !voxel_size.is_finite() || voxel_size <= 0.0 {
    return Err(VoxelError::InvalidVoxelSize(voxel_size));
  }

  let mut raw: Vec<[i64; 3]> = Vec::with_capacity(points.len());
  for (index, p) in points.iter().enumerate() {
    let mut c = [0i64; 3];
    for axis in 0..3 {
      let v = (p[axis] / voxel_size).round();
      if !v.is_finite() {
        return Err(VoxelError::NonFinitePoint(index));
      }
      if v < i32::MIN as f32 || v > i32::MAX as f32 {
        return Err(VoxelError::CoordinateOverflow(index));
      }
      c[axis] = v as i64;
    }
    raw.push(c);
  }

  let Some(min) = raw
    .iter()
    .copied()
    .reduce(|a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])])
  else {
    return Ok(Vec::new());
  };

  raw
    .iter()
    .enumerate()
    .map(|(index, c)| {
      let mut shifted = [0i32; 3];
      for axis in 0..3 {
        shifted[axis] = i32::try_from(c[axis] - min[axis])
          .map_err(|_| VoxelError::CoordinateOverflow(index))?;
      }
      Ok(shifted)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duplicate_points_share_a_voxel() {
    let coords = [[1, 1, 1], [0, 0, 0], [1, 1, 1], [2, 0, 1], [0, 0, 0]];
    let q = sparse_quantize(&coords).unwrap();

    assert_eq!(q.num_voxels(), 3);
    assert_eq!(q.inverse.len(), coords.len());
    assert_eq!(q.inverse[0], q.inverse[2]);
    assert_eq!(q.inverse[1], q.inverse[4]);
    // 代表点是该体素中最先出现的点
    assert_eq!(q.indices[q.inverse[0] as usize], 0);
    assert_eq!(q.indices[q.inverse[4] as usize], 1);
  }

  #[test]
  fn inverse_points_back_to_same_voxel() {
    let coords: Vec<[i32; 3]> = (0..200)
      .map(|i| [i % 7 - 3, (i * 3) % 5, (i / 11) % 4])
      .collect();
    let q = sparse_quantize(&coords).unwrap();
    for (point, &voxel) in q.inverse.iter().enumerate() {
      assert_eq!(coords[q.indices[voxel as usize]], coords[point]);
    }
  }

  #[test]
  fn voxels_are_ordered_by_hash() {
    let coords = [[2, 0, 0], [0, 0, 1], [0, 1, 0], [0, 0, 0]];
    let keys = ravel_hash(&coords).unwrap();
    let q = sparse_quantize(&coords).unwrap();
    let ordered: Vec<u64> = q.indices.iter().map(|&i| keys[i]).collect();
    assert!(ordered.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(q.indices, vec![3, 1, 2, 0]);
  }

  #[test]
  fn voxel_coordinates_start_at_zero() {
    let points = [
      [-0.26, 0.0, 1.0, 0.5],
      [0.24, -0.1, 1.04, 0.1],
      [0.0, 0.1, 0.98, 0.0],
    ];
    let coords = voxel_coords(&points, 0.05).unwrap();
    assert_eq!(coords[0], [0, 2, 0]);
    assert_eq!(coords[1], [10, 0, 1]);
    assert_eq!(coords[2], [5, 4, 0]);
  }

  #[test]
  fn empty_cloud_has_no_voxels() {
    let q = sparse_quantize(&[]).unwrap();
    assert_eq!(q.num_voxels(), 0);
    assert!(q.inverse.is_empty());
  }

  #[test]
  fn bad_coordinates_are_rejected() {
    let points = [[f32::INFINITY, 0.0, 0.0, 0.0], [-1.0, 0.0, 0.0, 0.0]];
    assert_eq!(voxel_coords(&points, 0.05), Err(VoxelError::NonFinitePoint(0)));

    let points = [[0.0, f32::NAN, 0.0, 0.0]];
    assert_eq!(voxel_coords(&points, 0.05), Err(VoxelError::NonFinitePoint(0)));

    let points = [[0.0, 0.0, 0.0, 0.0], [1.0e9, 0.0, 0.0, 0.0]];
    assert_eq!(voxel_coords(&points, 0.05), Err(VoxelError::CoordinateOverflow(1)));

    // 各自在 i32 内，相减后越界
    let points = [[-1.0e8, 0.0, 0.0, 0.0], [1.0e8, 0.0, 0.0, 0.0]];
    assert_eq!(voxel_coords(&points, 0.05), Err(VoxelError::CoordinateOverflow(1)));
  }

  #[test]
  fn voxel_size_must_be_positive() {
    let points = [[0.0, 0.0, 0.0, 0.0]];
    for size in [0.0, -0.05, f32::NAN] {
      assert!(matches!(
        voxel_coords(&points, size),
        Err(VoxelError::InvalidVoxelSize(_))
      ));
    }
  }

  #[test]
  fn oversized_grid_is_a_hash_error() {
    let coords = [[i32::MIN, i32::MIN, i32::MIN], [i32::MAX, i32::MAX, i32::MAX]];
    assert!(matches!(ravel_hash(&coords), Err(VoxelError::HashOverflow(_))));
    assert!(sparse_quantize(&coords).is_err());
  }
}
