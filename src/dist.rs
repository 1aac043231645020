// 该文件是 Dianyun （点云） 项目的一部分。
// src/dist.rs - 多副本进程组视图与分片采样
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

use crate::dataset::{Dataset, DatasetIter};

/// 单个副本在组内的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistContext {
  rank: usize,
  size: usize,
  local_rank: usize,
}

impl DistContext {
  pub fn single() -> Self {
    Self {
      rank: 0,
      size: 1,
      local_rank: 0,
    }
  }

  /// 单机上的 `size` 个副本，本地序号即全局序号
  pub fn group(size: usize) -> Vec<Self> {
    let size = size.max(1);
    (0..size)
      .map(|rank| Self {
        rank,
        size,
        local_rank: rank,
      })
      .collect()
  }

  pub fn rank(&self) -> usize {
    self.rank
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn local_rank(&self) -> usize {
    self.local_rank
  }

  pub fn is_main(&self) -> bool {
    self.rank == 0
  }
}

/// 按副本跨步切分数据集，不打乱也不补齐
#[derive(Debug, Clone, Copy)]
pub struct DistributedSampler {
  len: usize,
  ctx: DistContext,
}

impl DistributedSampler {
  pub fn new(len: usize, ctx: DistContext) -> Self {
    Self { len, ctx }
  }

  pub fn indices(&self) -> Vec<usize> {
    (self.ctx.rank..self.len).step_by(self.ctx.size).collect()
  }

  pub fn num_samples(&self) -> usize {
    self.len.saturating_sub(self.ctx.rank).div_ceil(self.ctx.size)
  }

  pub fn iter<'a, D: Dataset + ?Sized>(&self, dataset: &'a D) -> DatasetIter<'a, D> {
    DatasetIter::new(dataset, self.indices())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shards_partition_the_dataset() {
    let len = 23;
    let group = DistContext::group(4);
    let mut seen: Vec<usize> = group
      .iter()
      .flat_map(|ctx| DistributedSampler::new(len, *ctx).indices())
      .collect();
    seen.sort();
    assert_eq!(seen, (0..len).collect::<Vec<_>>());
  }

  #[test]
  fn shard_sizes_match_indices() {
    for ctx in DistContext::group(3) {
      let sampler = DistributedSampler::new(10, ctx);
      assert_eq!(sampler.num_samples(), sampler.indices().len());
    }
    let sampler = DistributedSampler::new(2, DistContext::group(4)[3]);
    assert_eq!(sampler.num_samples(), 0);
    assert!(sampler.indices().is_empty());
  }

  #[test]
  fn empty_group_falls_back_to_single() {
    let group = DistContext::group(0);
    assert_eq!(group, vec![DistContext::single()]);
    assert!(group[0].is_main());
  }
}
