// 该文件是 Dianyun （点云） 项目的一部分。
// src/model.rs - 模型
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

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("未实现的模型: {0}")]
  Unimplemented(String),
}

/// 模型结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
  SpvnasSpecialized,
  Spvcnn,
  MinkUNet,
}

impl ModelKind {
  /// 按名称中的关键字选择结构，顺序: spvnas, spvcnn, mink
  pub fn from_name(name: &str) -> Result<Self, ModelError> {
    let lower = name.to_lowercase();
    if lower.contains("spvnas") {
      Ok(ModelKind::SpvnasSpecialized)
    } else if lower.contains("spvcnn") {
      Ok(ModelKind::Spvcnn)
    } else if lower.contains("mink") {
      Ok(ModelKind::MinkUNet)
    } else {
      Err(ModelError::Unimplemented(name.to_string()))
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ModelKind::SpvnasSpecialized => "SPVNAS",
      ModelKind::Spvcnn => "SPVCNN",
      ModelKind::MinkUNet => "MinkUNet",
    }
  }
}

/// 每个体素一行的类别得分
#[derive(Debug, Clone, PartialEq)]
pub struct Logits {
  data: Box<[f32]>,
  num_classes: usize,
}

impl Logits {
  pub fn new(data: Vec<f32>, num_classes: usize) -> Self {
    if num_classes == 0 || data.len() % num_classes != 0 {
      panic!(
        "得分长度 {} 不是类别数 {} 的整数倍",
        data.len(),
        num_classes
      );
    }

    Self {
      data: data.into_boxed_slice(),
      num_classes,
    }
  }

  pub fn rows(&self) -> usize {
    self.data.len() / self.num_classes
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn row(&self, index: usize) -> &[f32] {
    &self.data[index * self.num_classes..(index + 1) * self.num_classes]
  }

  /// 得分最高的类别，并列时取下标最小者
  pub fn argmax(&self, index: usize) -> u32 {
    let mut best = 0usize;
    let mut best_score = f32::MIN;
    for (class, &score) in self.row(index).iter().enumerate() {
      if score > best_score {
        best_score = score;
        best = class;
      }
    }
    best as u32
  }
}

#[cfg(feature = "rknn")]
mod rknn_segmentor;
#[cfg(feature = "rknn")]
pub use self::rknn_segmentor::{RknnSegmentor, RknnSegmentorBuilder, RknnSegmentorError};
