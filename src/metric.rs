// 该文件是 Dianyun （点云） 项目的一部分。
// src/metric.rs - 平均交并比
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

use serde::Serialize;
use std::convert::Infallible;

use crate::{FromConfig, config::EvalConfig};

/// 逐类别累计的交并比统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeanIoU {
  num_classes: usize,
  ignore_label: u32,
  total_seen: Vec<u64>,
  total_correct: Vec<u64>,
  total_positive: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassIoU {
  pub class: usize,
  pub name: Option<String>,
  pub iou: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IoUReport {
  pub classes: Vec<ClassIoU>,
  /// 百分制
  pub miou: f64,
  pub num_points: u64,
}

impl MeanIoU {
  pub fn new(num_classes: usize, ignore_label: u32) -> Self {
    Self {
      num_classes,
      ignore_label,
      total_seen: vec![0; num_classes],
      total_correct: vec![0; num_classes],
      total_positive: vec![0; num_classes],
    }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  /// 累计一个场景，真值为忽略标签的点不计入
  pub fn after_step(&mut self, outputs: &[u32], targets: &[u32]) {
    for (&output, &target) in outputs.iter().zip(targets) {
      if target == self.ignore_label {
        continue;
      }
      if let Some(seen) = self.total_seen.get_mut(target as usize) {
        *seen += 1;
        if output == target {
          self.total_correct[target as usize] += 1;
        }
      }
      if let Some(positive) = self.total_positive.get_mut(output as usize) {
        *positive += 1;
      }
    }
  }

  /// 汇总其他副本的统计
  pub fn merge(&mut self, other: &MeanIoU) {
    for (a, b) in [
      (&mut self.total_seen, &other.total_seen),
      (&mut self.total_correct, &other.total_correct),
      (&mut self.total_positive, &other.total_positive),
    ] {
      for (x, y) in a.iter_mut().zip(b) {
        *x += *y;
      }
    }
  }

  /// 未出现过的类别按 1.0 计
  pub fn ious(&self) -> Vec<f64> {
    (0..self.num_classes)
      .map(|i| {
        if self.total_seen[i] == 0 {
          1.0
        } else {
          let union = self.total_seen[i] + self.total_positive[i] - self.total_correct[i];
          self.total_correct[i] as f64 / union as f64
        }
      })
      .collect()
  }

  pub fn after_epoch<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> IoUReport {
    let ious = self.ious();
    let miou = if ious.is_empty() {
      0.0
    } else {
      ious.iter().sum::<f64>() / ious.len() as f64 * 100.0
    };

    let mut names = names.into_iter();
    let classes = ious
      .into_iter()
      .enumerate()
      .map(|(class, iou)| ClassIoU {
        class,
        name: names.next().map(str::to_string),
        iou,
      })
      .collect();

    IoUReport {
      classes,
      miou,
      num_points: self.total_seen.iter().sum(),
    }
  }
}

impl FromConfig for MeanIoU {
  type Error = Infallible;

  fn from_config(config: &EvalConfig) -> Result<Self, Self::Error> {
    Ok(Self::new(config.data.num_classes, config.data.ignore_label))
  }
}
