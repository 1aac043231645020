// 该文件是 Dianyun （点云） 项目的一部分。
// src/dataset/label_map.rs - SemanticKITTI 标签映射
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

/// 原始标签 id 与名称
const RAW_LABELS: [(u32, &str); 34] = [
  (0, "unlabeled"),
  (1, "outlier"),
  (10, "car"),
  (11, "bicycle"),
  (13, "bus"),
  (15, "motorcycle"),
  (16, "on-rails"),
  (18, "truck"),
  (20, "other-vehicle"),
  (30, "person"),
  (31, "bicyclist"),
  (32, "motorcyclist"),
  (40, "road"),
  (44, "parking"),
  (48, "sidewalk"),
  (49, "other-ground"),
  (50, "building"),
  (51, "fence"),
  (52, "other-structure"),
  (60, "lane-marking"),
  (70, "vegetation"),
  (71, "trunk"),
  (72, "terrain"),
  (80, "pole"),
  (81, "traffic-sign"),
  (99, "other-object"),
  (252, "moving-car"),
  (253, "moving-bicyclist"),
  (254, "moving-person"),
  (255, "moving-motorcyclist"),
  (256, "moving-on-rails"),
  (257, "moving-bus"),
  (258, "moving-truck"),
  (259, "moving-other-vehicle"),
];

/// 参与训练与评估的类别
const KEPT_LABELS: [&str; 19] = [
  "road",
  "sidewalk",
  "parking",
  "other-ground",
  "building",
  "car",
  "truck",
  "bicycle",
  "motorcycle",
  "other-vehicle",
  "vegetation",
  "trunk",
  "terrain",
  "person",
  "bicyclist",
  "motorcyclist",
  "fence",
  "pole",
  "traffic-sign",
];

const MOVING_PREFIX: &str = "moving-";
const FIRST_MOVING_ID: u32 = 250;
const RAW_LABEL_MASK: u32 = 0xFFFF;

/// 原始标签 -> 训练类别的查找表
#[derive(Debug, Clone)]
pub struct LabelMap {
  forward: Vec<u32>,
  /// 类别 -> (原始 id, 名称)
  classes: Vec<(u32, &'static str)>,
  ignore_label: u32,
}

impl LabelMap {
  /// 按原始 id 升序为保留类别编号，运动类别折叠到对应静态类别
  pub fn semantic_kitti(ignore_label: u32) -> Self {
    let size = RAW_LABELS.iter().map(|(id, _)| *id).max().unwrap_or(0) as usize + 1;
    let mut forward = vec![ignore_label; size];
    let mut classes: Vec<(u32, &'static str)> = Vec::new();

    for &(id, name) in RAW_LABELS.iter() {
      if id > FIRST_MOVING_ID {
        let static_name = name.trim_start_matches(MOVING_PREFIX);
        if let Some(class) = classes.iter().position(|(_, n)| *n == static_name) {
          forward[id as usize] = class as u32;
        }
      } else if id != 0 && KEPT_LABELS.contains(&name) {
        forward[id as usize] = classes.len() as u32;
        classes.push((id, name));
      }
    }

    Self {
      forward,
      classes,
      ignore_label,
    }
  }

  pub fn num_classes(&self) -> usize {
    self.classes.len()
  }

  pub fn ignore_label(&self) -> u32 {
    self.ignore_label
  }

  /// 原始标签字（低 16 位为语义）-> 训练类别
  pub fn map(&self, raw: u32) -> u32 {
    self
      .forward
      .get((raw & RAW_LABEL_MASK) as usize)
      .copied()
      .unwrap_or(self.ignore_label)
  }

  /// 训练类别 -> 原始 id，忽略标签映射为 0 (unlabeled)
  pub fn inverse(&self, class: u32) -> u32 {
    self
      .classes
      .get(class as usize)
      .map(|(id, _)| *id)
      .unwrap_or(0)
  }

  pub fn class_name(&self, class: usize) -> Option<&'static str> {
    self.classes.get(class).map(|(_, name)| *name)
  }

  pub fn class_names(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.classes.iter().map(|(_, name)| *name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kept_classes_are_numbered_by_raw_id() {
    let map = LabelMap::semantic_kitti(255);
    assert_eq!(map.num_classes(), 19);
    assert_eq!(map.map(10), 0); // car
    assert_eq!(map.map(11), 1); // bicycle
    assert_eq!(map.map(40), 8); // road
    assert_eq!(map.map(81), 18); // traffic-sign
    assert_eq!(map.class_name(8), Some("road"));
  }

  #[test]
  fn moving_labels_fold_to_static_class() {
    let map = LabelMap::semantic_kitti(255);
    assert_eq!(map.map(252), map.map(10));
    assert_eq!(map.map(254), map.map(30));
    assert_eq!(map.map(258), map.map(18));
    // bus 与 on-rails 不参与评估
    assert_eq!(map.map(257), 255);
    assert_eq!(map.map(256), 255);
  }

  #[test]
  fn unknown_and_unlabeled_are_ignored() {
    let map = LabelMap::semantic_kitti(255);
    assert_eq!(map.map(0), 255);
    assert_eq!(map.map(52), 255);
    assert_eq!(map.map(1000), 255);
  }

  #[test]
  fn instance_bits_are_masked() {
    let map = LabelMap::semantic_kitti(255);
    assert_eq!(map.map(40 | (7 << 16)), 8);
  }

  #[test]
  fn inverse_restores_raw_id() {
    let map = LabelMap::semantic_kitti(255);
    for class in 0..map.num_classes() as u32 {
      assert_eq!(map.map(map.inverse(class)), class);
    }
    assert_eq!(map.inverse(255), 0);
  }
}
