// 该文件是 Dianyun （点云） 项目的一部分。
// src/model/rknn_segmentor.rs - RKNN 点云分割模型
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  model::{Logits, Model, ModelKind},
  sparse::SparseTensor,
};

const SEGMENTOR_NUM_INPUTS: u32 = 2;
const SEGMENTOR_NUM_OUTPUTS: u32 = 1;
const SEGMENTOR_FEAT_CHANNELS: usize = 4;
const SEGMENTOR_COORD_CHANNELS: usize = 4;

pub struct RknnSegmentor {
  context: Context,
  kind: ModelKind,
  num_classes: usize,
  max_voxels: usize,
}

#[derive(Error, Debug)]
pub enum RknnSegmentorError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("体素数 {0} 超出模型容量 {1}")]
  CapacityExceeded(usize, usize),
  #[error("输入通道数 {0} 与模型不符, 期望 {1}")]
  ChannelMismatch(usize, usize),
  #[error("模型输出错误: {0}")]
  OutputError(String),
  #[error("类别数必须大于 0")]
  NoClasses,
}

impl RknnSegmentorError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnSegmentorError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknnSegmentorBuilder {
  model_path: PathBuf,
  kind: ModelKind,
  flags: InitFlags,
  num_classes: usize,
  max_voxels: usize,
}

impl RknnSegmentorBuilder {
  pub fn new(model_path: PathBuf, kind: ModelKind) -> Self {
    Self {
      model_path,
      kind,
      flags: InitFlags::default(),
      num_classes: 19,
      max_voxels: 120_000,
    }
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn max_voxels(mut self, max_voxels: usize) -> Self {
    self.max_voxels = max_voxels;
    self
  }

  pub fn build(self) -> Result<RknnSegmentor, RknnSegmentorError> {
    if self.num_classes == 0 {
      return Err(RknnSegmentorError::NoClasses);
    }

    info!(
      "加载 {} 模型文件: {}",
      self.kind.as_str(),
      self.model_path.display()
    );
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnSegmentorError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnSegmentorError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnSegmentorError::invalid("无法获取输出数量", e))?;

    if num_inputs != SEGMENTOR_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        SEGMENTOR_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(RknnSegmentorError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    if num_outputs != SEGMENTOR_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输出数量为 {}, 实际为 {}",
        SEGMENTOR_NUM_OUTPUTS, num_outputs
      );
      error!("{}", msg);
      return Err(RknnSegmentorError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(RknnSegmentor {
      context,
      kind: self.kind,
      num_classes: self.num_classes,
      max_voxels: self.max_voxels,
    })
  }
}

/// 补零到模型容量 `max_voxels`，特征与坐标均按行排列
fn pad_inputs(max_voxels: usize, input: &SparseTensor<f32>) -> (Vec<f32>, Vec<i32>) {
  let mut feats = vec![0f32; max_voxels * SEGMENTOR_FEAT_CHANNELS];
  feats[..input.feats().len()].copy_from_slice(input.feats());

  let mut coords = vec![0i32; max_voxels * SEGMENTOR_COORD_CHANNELS];
  for (dst, src) in coords
    .chunks_exact_mut(SEGMENTOR_COORD_CHANNELS)
    .zip(input.coords())
  {
    dst.copy_from_slice(src);
  }

  (feats, coords)
}

impl RknnSegmentor {
  pub fn kind(&self) -> ModelKind {
    self.kind
  }

  /// 截取真实体素对应的得分
  fn postprocess(&self, output: rknpu::Output, rows: usize) -> Result<Logits, RknnSegmentorError> {
    let scores = output
      .get_f32(0)
      .map_err(|e| RknnSegmentorError::OutputError(e.to_string()))?;

    let expected = rows * self.num_classes;
    if scores.len() < expected {
      return Err(RknnSegmentorError::OutputError(format!(
        "输出长度 {} 小于期望 {}",
        scores.len(),
        expected
      )));
    }

    Ok(Logits::new(scores[..expected].to_vec(), self.num_classes))
  }
}

impl Model for RknnSegmentor {
  type Input = SparseTensor<f32>;
  type Output = Logits;
  type Error = RknnSegmentorError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if input.channels() != SEGMENTOR_FEAT_CHANNELS {
      return Err(RknnSegmentorError::ChannelMismatch(
        input.channels(),
        SEGMENTOR_FEAT_CHANNELS,
      ));
    }
    if input.len() > self.max_voxels {
      return Err(RknnSegmentorError::CapacityExceeded(
        input.len(),
        self.max_voxels,
      ));
    }

    debug!("设置模型输入: {} 个体素", input.len());
    let (feats, coords) = pad_inputs(self.max_voxels, input);
    self.context.set_input(
      0,
      bytemuck::cast_slice(&feats),
      TensorFormat::NCHW,
      TensorType::Float32,
    )?;
    self.context.set_input(
      1,
      bytemuck::cast_slice(&coords),
      TensorFormat::NCHW,
      TensorType::Int32,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    self.postprocess(output, input.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inputs_are_zero_padded_to_capacity() {
    let input = SparseTensor::new(
      vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
      vec![[0, 1, 2, 0], [3, 4, 5, 1]],
      SEGMENTOR_FEAT_CHANNELS,
    );
    let (feats, coords) = pad_inputs(4, &input);

    assert_eq!(feats.len(), 4 * SEGMENTOR_FEAT_CHANNELS);
    assert_eq!(&feats[..8], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    assert!(feats[8..].iter().all(|&v| v == 0.0));

    // 每行 [x, y, z, batch]
    assert_eq!(coords.len(), 4 * SEGMENTOR_COORD_CHANNELS);
    assert_eq!(&coords[..8], &[0, 1, 2, 0, 3, 4, 5, 1]);
    assert!(coords[8..].iter().all(|&v| v == 0));
  }

  #[test]
  fn full_capacity_needs_no_padding() {
    let input = SparseTensor::new(vec![0.5; 4], vec![[7, 8, 9, 2]], SEGMENTOR_FEAT_CHANNELS);
    let (feats, coords) = pad_inputs(1, &input);
    assert_eq!(feats, vec![0.5; 4]);
    assert_eq!(coords, vec![7, 8, 9, 2]);
  }

  #[test]
  fn zero_classes_are_rejected_before_loading() {
    let result = RknnSegmentorBuilder::new(PathBuf::from("/nonexistent/model.rknn"), ModelKind::Spvcnn)
      .num_classes(0)
      .build();
    assert!(matches!(result, Err(RknnSegmentorError::NoClasses)));
  }
}
