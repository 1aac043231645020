// 该文件是 Dianyun （点云） 项目的一部分。
// src/output.rs - 输出定义
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
use tracing::debug;

use crate::{
  dataset::LabelMap,
  label::{LabelError, label_path, prepare_save_dir, write_label_file},
  remap::ScenePrediction,
};

pub trait Render<Output> {
  type Error;
  fn render_result(&self, result: &Output) -> Result<(), Self::Error>;
}

impl<Output, R: Render<Output>> Render<Output> for &R {
  type Error = R::Error;

  fn render_result(&self, result: &Output) -> Result<(), Self::Error> {
    (**self).render_result(result)
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("标签文件错误: {0}")]
  LabelError(#[from] LabelError),
}

/// 将预测写为 `<save_dir>/<seq>/<scan>.label`
pub struct LabelFileOutput {
  save_dir: PathBuf,
  raw_labels: Option<LabelMap>,
}

impl LabelFileOutput {
  /// 创建输出并准备 `00` ~ `10` 序列目录
  pub fn new(save_dir: &Path) -> Result<Self, OutputError> {
    prepare_save_dir(save_dir)?;
    Ok(Self {
      save_dir: save_dir.to_path_buf(),
      raw_labels: None,
    })
  }

  /// 写出前将类别下标还原为原始标签 id
  pub fn with_raw_labels(mut self, label_map: Option<LabelMap>) -> Self {
    self.raw_labels = label_map;
    self
  }

  pub fn save_dir(&self) -> &Path {
    &self.save_dir
  }
}

impl Render<ScenePrediction> for LabelFileOutput {
  type Error = OutputError;

  fn render_result(&self, result: &ScenePrediction) -> Result<(), Self::Error> {
    let path = label_path(&self.save_dir, &result.file_name)?;
    match &self.raw_labels {
      Some(map) => {
        let raw: Vec<u32> = result.outputs.iter().map(|&c| map.inverse(c)).collect();
        write_label_file(&path, &raw)?;
      }
      None => write_label_file(&path, &result.outputs)?,
    }
    Ok(())
  }
}

/// 只统计指标，不写文件
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOutput;

impl Render<ScenePrediction> for DiscardOutput {
  type Error = OutputError;

  fn render_result(&self, result: &ScenePrediction) -> Result<(), Self::Error> {
    debug!("丢弃预测结果: {}", result.file_name.display());
    Ok(())
  }
}

pub enum OutputWrapper {
  LabelFile(LabelFileOutput),
  Discard(DiscardOutput),
}

impl OutputWrapper {
  /// 给定输出目录时写标签文件，否则只计算指标
  pub fn from_save_dir(
    save_dir: Option<&Path>,
    raw_labels: Option<LabelMap>,
  ) -> Result<Self, OutputError> {
    match save_dir {
      Some(dir) => Ok(OutputWrapper::LabelFile(
        LabelFileOutput::new(dir)?.with_raw_labels(raw_labels),
      )),
      None => Ok(OutputWrapper::Discard(DiscardOutput)),
    }
  }
}

impl Render<ScenePrediction> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, result: &ScenePrediction) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::LabelFile(output) => output.render_result(result),
      OutputWrapper::Discard(output) => output.render_result(result),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::read_label_file;

  fn prediction(outputs: Vec<u32>) -> ScenePrediction {
    ScenePrediction {
      file_name: PathBuf::from("/kitti/sequences/08/velodyne/000042.bin"),
      targets: vec![0; outputs.len()],
      outputs,
    }
  }

  #[test]
  fn class_indices_are_written_as_is() {
    let temp = tempfile::tempdir().unwrap();
    let output = OutputWrapper::from_save_dir(Some(temp.path()), None).unwrap();
    output.render_result(&prediction(vec![8, 0, 18])).unwrap();

    let written = read_label_file(&temp.path().join("08").join("000042.label")).unwrap();
    assert_eq!(written, vec![8, 0, 18]);
  }

  #[test]
  fn raw_labels_restore_semantic_kitti_ids() {
    let temp = tempfile::tempdir().unwrap();
    let output = LabelFileOutput::new(temp.path())
      .unwrap()
      .with_raw_labels(Some(LabelMap::semantic_kitti(255)));
    output.render_result(&prediction(vec![8, 0, 18])).unwrap();

    let written = read_label_file(&temp.path().join("08").join("000042.label")).unwrap();
    assert_eq!(written, vec![40, 10, 81]);
  }

  #[test]
  fn discard_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let output = OutputWrapper::from_save_dir(None, None).unwrap();
    output.render_result(&prediction(vec![1])).unwrap();
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
  }
}
