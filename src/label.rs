// 该文件是 Dianyun （点云） 项目的一部分。
// src/label.rs - SemanticKITTI 标签文件编解码
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
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

/// 实例标签在标签字中的偏移
pub const INSTANCE_SHIFT: u32 = 16;
/// 每个点在 `.label` 文件中占用的字节数
pub const LABEL_BYTES: usize = std::mem::size_of::<u32>();
/// 预先创建的序列目录数量（00 ~ 10）
pub const PREPARED_SEQUENCES: u8 = 11;

const LABEL_EXTENSION: &str = "label";

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("语义标签 {0} 超出 16 位范围")]
  SemanticOverflow(u32),
  #[error("标签文件长度 {0} 不是 4 的整数倍")]
  TruncatedFile(usize),
  #[error("无法从扫描路径推导输出文件名: {0}")]
  InvalidScanPath(PathBuf),
}

/// 将语义标签与实例标签打包为一个标签字
pub fn encode(semantic: u16, instance: u16) -> u32 {
  semantic as u32 | ((instance as u32) << INSTANCE_SHIFT)
}

/// 将标签字拆分为 (语义标签, 实例标签)
pub fn decode(label: u32) -> (u16, u16) {
  ((label & 0xFFFF) as u16, (label >> INSTANCE_SHIFT) as u16)
}

/// 写入预测结果，实例标签恒为 0
pub fn write_label_file(path: &Path, semantic: &[u32]) -> Result<(), LabelError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  let mut writer = BufWriter::new(File::create(path)?);
  for &class in semantic {
    let class = u16::try_from(class).map_err(|_| LabelError::SemanticOverflow(class))?;
    writer.write_all(&encode(class, 0).to_le_bytes())?;
  }
  writer.flush()?;

  debug!("写入标签文件: {} ({} 个点)", path.display(), semantic.len());
  Ok(())
}

/// 读取 `.label` 文件中的全部标签字
pub fn read_label_file(path: &Path) -> Result<Vec<u32>, LabelError> {
  let bytes = std::fs::read(path)?;
  if bytes.len() % LABEL_BYTES != 0 {
    return Err(LabelError::TruncatedFile(bytes.len()));
  }

  Ok(
    bytes
      .chunks_exact(LABEL_BYTES)
      .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect(),
  )
}

/// `<seq>/velodyne/<scan>.bin` -> `<save_dir>/<seq>/<scan>.label`
pub fn label_path(save_dir: &Path, scan_path: &Path) -> Result<PathBuf, LabelError> {
  let invalid = || LabelError::InvalidScanPath(scan_path.to_path_buf());

  let stem = scan_path.file_stem().ok_or_else(invalid)?;
  let sequence = scan_path
    .parent()
    .and_then(Path::parent)
    .and_then(Path::file_name)
    .ok_or_else(invalid)?;

  Ok(
    save_dir
      .join(sequence)
      .join(stem)
      .with_extension(LABEL_EXTENSION),
  )
}

/// 在输出目录下创建 `00` ~ `10` 序列目录，可重复调用
pub fn prepare_save_dir(save_dir: &Path) -> Result<(), LabelError> {
  for sequence in 0..PREPARED_SEQUENCES {
    let directory = save_dir.join(format!("{:02}", sequence));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
  }
  Ok(())
}
