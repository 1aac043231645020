// 该文件是 Dianyun （点云） 项目的一部分。
// src/dataset/semantic_kitti.rs - SemanticKITTI 数据集读取
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

use std::{
  path::{Path, PathBuf},
  str::FromStr,
};

use tracing::{debug, info, warn};

use super::{Dataset, DatasetError, LabelMap, ScanSample};
use crate::{FromConfig, config::EvalConfig, label::read_label_file};

const POINT_BYTES: usize = 4 * std::mem::size_of::<f32>();
const SCAN_DIR: &str = "velodyne";
const LABEL_DIR: &str = "labels";
const LABEL_EXTENSION: &str = "label";
const DATASET_NAME: &str = "semantic_kitti";

const TRAIN_SEQUENCES: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 9, 10];
const VAL_SEQUENCE: u8 = 8;
const SUBMIT_SEQUENCES: std::ops::RangeInclusive<u8> = 11..=21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
  Train,
  Val,
  Test,
}

impl FromStr for Split {
  type Err = DatasetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "train" => Ok(Split::Train),
      "val" => Ok(Split::Val),
      "test" => Ok(Split::Test),
      _ => Err(DatasetError::UnknownSplit(s.to_string())),
    }
  }
}

impl Split {
  /// 参与该划分的序列
  pub fn sequences(self, trainval: bool, submit: bool) -> Vec<u8> {
    match self {
      Split::Train => {
        let mut seqs = TRAIN_SEQUENCES.to_vec();
        if trainval {
          seqs.push(VAL_SEQUENCE);
        }
        seqs
      }
      Split::Val => vec![VAL_SEQUENCE],
      Split::Test if submit => SUBMIT_SEQUENCES.collect(),
      Split::Test => vec![VAL_SEQUENCE],
    }
  }
}

pub struct SemanticKitti {
  files: Vec<PathBuf>,
  label_map: LabelMap,
  voxel_size: f32,
}

impl SemanticKitti {
  pub fn new(
    root: &Path,
    sequences: &[u8],
    sample_stride: usize,
    voxel_size: f32,
    label_map: LabelMap,
  ) -> Result<Self, DatasetError> {
    let mut files = Vec::new();
    for seq in sequences {
      let directory = root.join(format!("{:02}", seq)).join(SCAN_DIR);
      let mut seq_files: Vec<PathBuf> = std::fs::read_dir(&directory)
        .map_err(|e| DatasetError::IoError(e, directory.clone()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
      seq_files.sort();
      debug!("序列 {:02}: {} 帧", seq, seq_files.len());
      files.extend(seq_files);
    }

    if sample_stride > 1 {
      files = files.into_iter().step_by(sample_stride).collect();
    }

    Ok(Self {
      files,
      label_map,
      voxel_size,
    })
  }

  pub fn label_map(&self) -> &LabelMap {
    &self.label_map
  }

  pub fn files(&self) -> &[PathBuf] {
    &self.files
  }

  /// `<seq>/velodyne/<scan>.bin` -> `<seq>/labels/<scan>.label`
  fn label_file(scan: &Path) -> Option<PathBuf> {
    let stem = scan.file_stem()?;
    let seq_dir = scan.parent()?.parent()?;
    Some(
      seq_dir
        .join(LABEL_DIR)
        .join(stem)
        .with_extension(LABEL_EXTENSION),
    )
  }
}

/// 读取 `x, y, z, intensity` 四元组
pub fn read_scan(path: &Path) -> Result<Vec<[f32; 4]>, DatasetError> {
  let bytes = std::fs::read(path).map_err(|e| DatasetError::IoError(e, path.to_path_buf()))?;
  if bytes.len() % POINT_BYTES != 0 {
    return Err(DatasetError::TruncatedScan(bytes.len(), path.to_path_buf()));
  }

  Ok(
    bytes
      .chunks_exact(POINT_BYTES)
      .map(|chunk| {
        let mut point = [0f32; 4];
        for (value, raw) in point.iter_mut().zip(chunk.chunks_exact(4)) {
          *value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        point
      })
      .collect(),
  )
}

impl Dataset for SemanticKitti {
  fn len(&self) -> usize {
    self.files.len()
  }

  fn get(&self, index: usize) -> Result<ScanSample, DatasetError> {
    let scan = self
      .files
      .get(index)
      .ok_or(DatasetError::IndexOutOfRange(index, self.files.len()))?;
    let points = read_scan(scan)?;

    let labels = match Self::label_file(scan) {
      Some(path) if path.exists() => read_label_file(&path)?
        .into_iter()
        .map(|raw| self.label_map.map(raw))
        .collect(),
      _ => vec![self.label_map.ignore_label(); points.len()],
    };

    ScanSample::voxelize(scan.clone(), &points, labels, self.voxel_size)
  }
}

impl FromConfig for SemanticKitti {
  type Error = DatasetError;

  fn from_config(config: &EvalConfig) -> Result<Self, Self::Error> {
    let dataset = &config.dataset;
    if dataset.name != DATASET_NAME {
      return Err(DatasetError::UnknownDataset(dataset.name.clone()));
    }

    let split = Split::from_str(&dataset.split)?;
    let sequences = split.sequences(dataset.trainval, dataset.submit);
    info!(
      "加载 SemanticKITTI {:?} 划分, 序列: {:?}",
      split, sequences
    );
    if split == Split::Test && dataset.submit {
      warn!("提交模式: 测试序列没有真值, mIoU 不具参考意义");
    }

    let label_map = LabelMap::semantic_kitti(config.data.ignore_label);
    let kitti = Self::new(
      &dataset.root,
      &sequences,
      dataset.sample_stride,
      dataset.voxel_size,
      label_map,
    )?;
    info!("共 {} 帧点云", kitti.len());
    Ok(kitti)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_scan(path: &Path, points: &[[f32; 4]]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let bytes: Vec<u8> = points
      .iter()
      .flat_map(|p| p.iter().flat_map(|v| v.to_le_bytes()))
      .collect();
    std::fs::write(path, bytes).unwrap();
  }

  #[test]
  fn test_split_follows_submit_flag() {
    assert_eq!(Split::Test.sequences(false, false), vec![8]);
    assert_eq!(Split::Test.sequences(false, true), (11..=21).collect::<Vec<u8>>());
    assert!(Split::Train.sequences(true, false).contains(&8));
    assert!(!Split::Train.sequences(false, false).contains(&8));
    assert!(Split::from_str("dev").is_err());
  }

  #[test]
  fn scan_without_labels_is_ignored() {
    let temp = tempfile::tempdir().unwrap();
    let scan = temp.path().join("08").join(SCAN_DIR).join("000000.bin");
    write_scan(&scan, &[[0.0, 0.0, 0.0, 1.0], [2.0, 0.0, 0.0, 1.0]]);

    let kitti = SemanticKitti::new(temp.path(), &[8], 1, 0.05, LabelMap::semantic_kitti(255)).unwrap();
    let sample = kitti.get(0).unwrap();
    assert_eq!(sample.num_points(), 2);
    assert_eq!(sample.targets_mapped.feats(), &[255, 255]);
  }

  #[test]
  fn labels_are_mapped_and_files_sorted() {
    let temp = tempfile::tempdir().unwrap();
    let seq = temp.path().join("08");
    for name in ["000001", "000000", "000002"] {
      write_scan(
        &seq.join(SCAN_DIR).join(format!("{name}.bin")),
        &[[0.0, 0.0, 0.0, 0.0], [1.0, 1.0, 1.0, 0.0]],
      );
    }
    std::fs::create_dir_all(seq.join(LABEL_DIR)).unwrap();
    let raw: Vec<u8> = [40u32 | (3 << 16), 252]
      .iter()
      .flat_map(|v| v.to_le_bytes())
      .collect();
    std::fs::write(seq.join(LABEL_DIR).join("000000.label"), raw).unwrap();

    let kitti = SemanticKitti::new(temp.path(), &[8], 2, 0.05, LabelMap::semantic_kitti(255)).unwrap();
    assert_eq!(kitti.len(), 2);
    assert!(kitti.files()[0].ends_with("000000.bin"));
    assert!(kitti.files()[1].ends_with("000002.bin"));

    let sample = kitti.get(0).unwrap();
    assert_eq!(sample.targets_mapped.feats(), &[8, 0]);
    assert!(matches!(
      kitti.get(5),
      Err(DatasetError::IndexOutOfRange(5, 2))
    ));
  }

  #[test]
  fn truncated_scan_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bad.bin");
    std::fs::write(&path, [0u8; 20]).unwrap();
    assert!(matches!(
      read_scan(&path),
      Err(DatasetError::TruncatedScan(20, _))
    ));
  }
}
