// 该文件是 Dianyun （点云） 项目的一部分。
// src/config.rs - 评估配置
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

use ::config::{Config, File, FileFormat, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_CONFIG_NAME: &str = "default.yaml";

#[derive(Error, Debug)]
pub enum ConfigLoadError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ::config::ConfigError),
  #[error("配置文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("覆盖项缺少取值: {0}")]
  MissingValue(String),
  #[error("配置项 {0} 取值无效: {1}")]
  InvalidValue(&'static str, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
  #[serde(default)]
  pub distributed: bool,
  /// 分布式模式下的模型副本数
  #[serde(default = "default_num_replicas")]
  pub num_replicas: usize,
  #[serde(default)]
  pub data: DataConfig,
  #[serde(default)]
  pub dataset: DatasetConfig,
  #[serde(default)]
  pub model: ModelConfig,
  #[serde(default)]
  pub eval: EvalLoopConfig,
  #[serde(default)]
  pub submission: SubmissionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
  #[serde(default = "default_num_classes")]
  pub num_classes: usize,
  #[serde(default = "default_ignore_label")]
  pub ignore_label: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
  #[serde(default = "default_dataset_name")]
  pub name: String,
  #[serde(default = "default_dataset_root")]
  pub root: PathBuf,
  #[serde(default = "default_voxel_size")]
  pub voxel_size: f32,
  #[serde(default = "default_split")]
  pub split: String,
  #[serde(default = "default_sample_stride")]
  pub sample_stride: usize,
  #[serde(default)]
  pub submit: bool,
  #[serde(default)]
  pub trainval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
  /// 没有训练检查点时使用的预训练模型目录
  #[serde(default = "default_pretrained_dir")]
  pub pretrained_dir: PathBuf,
  /// 编译模型的体素容量
  #[serde(default = "default_max_voxels")]
  pub max_voxels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalLoopConfig {
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
  #[serde(default = "default_log_interval")]
  pub log_interval: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionConfig {
  /// 写出原始 SemanticKITTI 标签 id 而非类别下标
  #[serde(default)]
  pub raw_labels: bool,
}

fn default_num_replicas() -> usize {
  1
}
fn default_num_classes() -> usize {
  19
}
fn default_ignore_label() -> u32 {
  255
}
fn default_dataset_name() -> String {
  "semantic_kitti".to_string()
}
fn default_dataset_root() -> PathBuf {
  PathBuf::from("/dataset/semantic-kitti/dataset/sequences")
}
fn default_voxel_size() -> f32 {
  0.05
}
fn default_split() -> String {
  "test".to_string()
}
fn default_sample_stride() -> usize {
  1
}
fn default_pretrained_dir() -> PathBuf {
  PathBuf::from("pretrained")
}
fn default_max_voxels() -> usize {
  120_000
}
fn default_batch_size() -> usize {
  1
}
fn default_log_interval() -> usize {
  100
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self {
      distributed: false,
      num_replicas: default_num_replicas(),
      data: DataConfig::default(),
      dataset: DatasetConfig::default(),
      model: ModelConfig::default(),
      eval: EvalLoopConfig::default(),
      submission: SubmissionConfig::default(),
    }
  }
}

impl Default for DataConfig {
  fn default() -> Self {
    Self {
      num_classes: default_num_classes(),
      ignore_label: default_ignore_label(),
    }
  }
}

impl Default for DatasetConfig {
  fn default() -> Self {
    Self {
      name: default_dataset_name(),
      root: default_dataset_root(),
      voxel_size: default_voxel_size(),
      split: default_split(),
      sample_stride: default_sample_stride(),
      submit: false,
      trainval: false,
    }
  }
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      pretrained_dir: default_pretrained_dir(),
      max_voxels: default_max_voxels(),
    }
  }
}

impl Default for EvalLoopConfig {
  fn default() -> Self {
    Self {
      batch_size: default_batch_size(),
      log_interval: default_log_interval(),
    }
  }
}

/// 由命令行透传的一条覆盖项
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
  pub key: String,
  pub value: OverrideValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
}

impl From<&str> for OverrideValue {
  fn from(raw: &str) -> Self {
    match raw {
      "True" | "true" => return OverrideValue::Bool(true),
      "False" | "false" => return OverrideValue::Bool(false),
      _ => {}
    }
    if let Ok(v) = raw.parse::<i64>() {
      OverrideValue::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
      OverrideValue::Float(v)
    } else {
      OverrideValue::Str(raw.to_string())
    }
  }
}

impl From<OverrideValue> for Value {
  fn from(value: OverrideValue) -> Self {
    match value {
      OverrideValue::Bool(v) => v.into(),
      OverrideValue::Int(v) => v.into(),
      OverrideValue::Float(v) => v.into(),
      OverrideValue::Str(v) => v.into(),
    }
  }
}

/// 解析 `--key value` 或 `--key=value` 形式的覆盖项
pub fn parse_overrides(opts: &[String]) -> Result<Vec<Override>, ConfigLoadError> {
  let mut overrides = Vec::new();
  let mut index = 0;
  while index < opts.len() {
    let opt = opts[index].trim_start_matches("--");
    let (key, value) = match opt.split_once('=') {
      Some((key, value)) => {
        index += 1;
        (key, value)
      }
      None => {
        let value = opts
          .get(index + 1)
          .ok_or_else(|| ConfigLoadError::MissingValue(opt.to_string()))?;
        index += 2;
        (opt, value.as_str())
      }
    };
    overrides.push(Override {
      key: key.to_string(),
      value: OverrideValue::from(value),
    });
  }
  Ok(overrides)
}

/// 由外到内依次存在的 `default.yaml`，不含配置文件本身
pub fn config_chain(path: &Path) -> Vec<PathBuf> {
  let mut chain: Vec<PathBuf> = path
    .ancestors()
    .skip(1)
    .filter(|dir| !dir.as_os_str().is_empty())
    .map(|dir| dir.join(DEFAULT_CONFIG_NAME))
    .filter(|candidate| candidate.is_file() && candidate != path)
    .collect();
  chain.reverse();
  chain
}

impl EvalConfig {
  /// 加载配置；`recursive` 时先合并各级目录的 `default.yaml`
  pub fn load(
    path: &Path,
    recursive: bool,
    overrides: &[Override],
  ) -> Result<Self, ConfigLoadError> {
    if !path.is_file() {
      return Err(ConfigLoadError::NotFound(path.to_path_buf()));
    }

    let mut builder = Config::builder();
    if recursive {
      for default in config_chain(path) {
        debug!("合并默认配置: {}", default.display());
        builder = builder.add_source(File::from(default).format(FileFormat::Yaml));
      }
    }
    builder = builder.add_source(File::from(path).format(FileFormat::Yaml));

    for o in overrides {
      debug!("覆盖配置项: {} = {:?}", o.key, o.value);
      builder = builder.set_override(o.key.as_str(), o.value.clone())?;
    }

    let config: EvalConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
  }

  /// 检查会导致体素化或推理出错的取值
  pub fn validate(&self) -> Result<(), ConfigLoadError> {
    let voxel_size = self.dataset.voxel_size;
    if !voxel_size.is_finite() || voxel_size <= 0.0 {
      return Err(ConfigLoadError::InvalidValue(
        "dataset.voxel_size",
        voxel_size.to_string(),
      ));
    }
    if self.data.num_classes == 0 {
      return Err(ConfigLoadError::InvalidValue(
        "data.num_classes",
        self.data.num_classes.to_string(),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_follow_semantic_kitti() {
    let config = EvalConfig::default();
    assert_eq!(config.data.num_classes, 19);
    assert_eq!(config.data.ignore_label, 255);
    assert_eq!(config.dataset.voxel_size, 0.05);
    assert_eq!(config.eval.batch_size, 1);
    assert!(!config.distributed);
    assert!(!config.submission.raw_labels);
  }

  #[test]
  fn overrides_accept_both_forms() {
    let opts: Vec<String> = ["--data.num_classes", "20", "--dataset.root=/tmp/kitti", "--distributed", "True"]
      .iter()
      .map(|s| s.to_string())
      .collect();
    let parsed = parse_overrides(&opts).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].key, "data.num_classes");
    assert_eq!(parsed[0].value, OverrideValue::Int(20));
    assert_eq!(parsed[1].value, OverrideValue::Str("/tmp/kitti".to_string()));
    assert_eq!(parsed[2].value, OverrideValue::Bool(true));
  }

  #[test]
  fn dangling_override_is_an_error() {
    let opts = vec!["--dataset.voxel_size".to_string()];
    assert!(matches!(
      parse_overrides(&opts),
      Err(ConfigLoadError::MissingValue(_))
    ));
  }

  #[test]
  fn recursive_load_merges_outer_defaults_first() {
    let temp = tempfile::tempdir().unwrap();
    let outer = temp.path().join("configs");
    let inner = outer.join("semantic_kitti");
    std::fs::create_dir_all(&inner).unwrap();
    std::fs::write(
      outer.join(DEFAULT_CONFIG_NAME),
      "num_replicas: 4\ndataset:\n  voxel_size: 0.1\n  root: /outer\n",
    )
    .unwrap();
    std::fs::write(
      inner.join(DEFAULT_CONFIG_NAME),
      "dataset:\n  root: /inner\ndata:\n  num_classes: 19\n",
    )
    .unwrap();
    let file = inner.join("spvcnn.yaml");
    std::fs::write(&file, "distributed: true\neval:\n  log_interval: 10\n").unwrap();

    assert_eq!(config_chain(&file).len(), 2);

    let overrides = parse_overrides(&["--dataset.sample_stride".to_string(), "5".to_string()]).unwrap();
    let config = EvalConfig::load(&file, true, &overrides).unwrap();
    assert!(config.distributed);
    assert_eq!(config.num_replicas, 4);
    assert_eq!(config.dataset.root, PathBuf::from("/inner"));
    assert_eq!(config.dataset.voxel_size, 0.1);
    assert_eq!(config.dataset.sample_stride, 5);
    assert_eq!(config.eval.log_interval, 10);

    let flat = EvalConfig::load(&file, false, &[]).unwrap();
    assert_eq!(flat.num_replicas, 1);
    assert_eq!(flat.dataset.voxel_size, 0.05);
  }

  #[test]
  fn missing_file_is_reported() {
    let err = EvalConfig::load(Path::new("/nonexistent/x.yaml"), true, &[]).unwrap_err();
    assert!(matches!(err, ConfigLoadError::NotFound(_)));
  }

  #[test]
  fn invalid_values_are_rejected_on_load() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("eval.yaml");
    std::fs::write(&file, "dataset:\n  voxel_size: 0.05\n").unwrap();
    assert!(EvalConfig::load(&file, false, &[]).is_ok());

    for (key, value) in [
      ("--dataset.voxel_size", "0"),
      ("--dataset.voxel_size", "-0.1"),
      ("--data.num_classes", "0"),
    ] {
      let overrides = parse_overrides(&[key.to_string(), value.to_string()]).unwrap();
      let err = EvalConfig::load(&file, false, &overrides).unwrap_err();
      assert!(
        matches!(err, ConfigLoadError::InvalidValue(name, _) if key.ends_with(name)),
        "{} = {}",
        key,
        value
      );
    }
  }
}
