// 该文件是 Dianyun （点云） 项目的一部分。
// src/run_dir.rs - 实验运行目录与日志
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
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
  sync::Mutex,
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const RUNS_DIR: &str = "runs";
pub const LOG_FILE: &str = "logging.log";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Error, Debug)]
pub enum RunDirError {
  #[error("I/O 错误: {0}, 路径: {1}")]
  IoError(std::io::Error, PathBuf),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("日志初始化错误: {0}")]
  LoggingError(#[from] tracing_subscriber::util::TryInitError),
}

/// 创建指定的运行目录
pub fn set_run_dir(dir: &Path) -> Result<PathBuf, RunDirError> {
  std::fs::create_dir_all(dir).map_err(|e| RunDirError::IoError(e, dir.to_path_buf()))?;
  Ok(dir.to_path_buf())
}

/// `runs/run-<YYYYmmdd-HHMMSS>`
pub fn auto_run_dir_name() -> PathBuf {
  let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
  Path::new(RUNS_DIR).join(format!("run-{}", stamp))
}

pub fn auto_set_run_dir() -> Result<PathBuf, RunDirError> {
  set_run_dir(&auto_run_dir_name())
}

/// 日志同时写到标准输出和 `<run_dir>/logging.log`
pub fn init_logging(run_dir: &Path) -> Result<(), RunDirError> {
  let path = run_dir.join(LOG_FILE);
  let file = File::options()
    .create(true)
    .append(true)
    .open(&path)
    .map_err(|e| RunDirError::IoError(e, path.clone()))?;

  tracing_subscriber::registry()
    .with(LevelFilter::INFO)
    .with(tracing_subscriber::fmt::layer())
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file)),
    )
    .try_init()?;

  info!("日志文件: {}", path.display());
  Ok(())
}

/// 将结果写为 `<run_dir>/summary.json`
pub fn write_summary<T: Serialize>(run_dir: &Path, summary: &T) -> Result<PathBuf, RunDirError> {
  let path = run_dir.join(SUMMARY_FILE);
  let file = File::create(&path).map_err(|e| RunDirError::IoError(e, path.clone()))?;
  serde_json::to_writer_pretty(BufWriter::new(file), summary)?;
  info!("结果已保存: {}", path.display());
  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auto_name_lives_under_runs() {
    let name = auto_run_dir_name();
    assert!(name.starts_with(RUNS_DIR));
    let leaf = name.file_name().unwrap().to_str().unwrap();
    assert!(leaf.starts_with("run-"));
    // run-YYYYmmdd-HHMMSS
    assert_eq!(leaf.len(), 19);
  }

  #[test]
  fn summary_is_pretty_json() {
    let temp = tempfile::tempdir().unwrap();
    let run_dir = set_run_dir(&temp.path().join("a").join("b")).unwrap();
    assert!(run_dir.is_dir());

    let path = write_summary(&run_dir, &serde_json::json!({ "miou": 61.5 })).unwrap();
    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(value["miou"], 61.5);
  }
}
